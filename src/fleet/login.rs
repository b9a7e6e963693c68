// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Login rules
//!
//! An ordered list of `selector -> (user, keyfile, cluster)` entries. Each
//! node takes the first rule whose selector matches it and keeps it: later
//! rules never override an earlier one, so narrow selectors go first and a
//! catch-all `*` goes last.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use super::filter;
use super::node::Node;
use crate::error::FleetError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginRule {
    /// One filter term, `*` for every node
    pub selector: String,
    #[serde(default)]
    pub login_user: String,
    #[serde(default)]
    pub keyfile: String,
    /// Cluster label given to matching nodes
    #[serde(default)]
    pub member_of: String,
}

/// Give every node its first matching rule and the rule's cluster label
///
/// Nodes that already carry a rule are left alone. Nodes matching nothing
/// keep `login = None` and an empty cluster.
pub fn assign(nodes: &mut [Node], rules: &[LoginRule]) -> Result<(), FleetError> {
    for rule in rules {
        let positions = filter::select_positions(nodes, &rule.selector)?;
        let mut assigned = 0;

        for pos in positions {
            let node = &mut nodes[pos];
            if node.login.is_some() {
                continue;
            }
            node.login = Some(rule.clone());
            node.cluster = rule.member_of.clone();
            assigned += 1;
        }

        debug!(selector = %rule.selector, cluster = %rule.member_of, assigned, "Applied login rule");
    }
    Ok(())
}

/// Everything needed to open an ssh session to one node
#[derive(Debug, Clone, PartialEq)]
pub struct SshLogin {
    pub node: String,
    pub host: String,
    /// None leaves the choice to ssh (local user or ssh_config)
    pub user: Option<String>,
    pub keyfile: PathBuf,
}

impl SshLogin {
    /// `user@host`, or just `host` without a configured user
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Resolve user, keyfile and address for a node
///
/// Keyfile precedence: cluster document, login rule, then the key-name to
/// keyfile mapping from the configuration. Without any of them the login is
/// ambiguous.
pub fn ssh_login(node: &Node, keyfiles: &BTreeMap<String, PathBuf>) -> Result<SshLogin, FleetError> {
    let keyfile = if !node.keyfile.is_empty() {
        PathBuf::from(&node.keyfile)
    } else if let Some(rule) = node.login.as_ref().filter(|r| !r.keyfile.is_empty()) {
        PathBuf::from(&rule.keyfile)
    } else if let Some(path) = keyfiles.get(node.key_name()) {
        path.clone()
    } else {
        return Err(FleetError::AmbiguousLogin {
            node: node.name.clone(),
            key: node.key_name().to_string(),
        });
    };

    let host = node
        .address()
        .ok_or_else(|| FleetError::NoAddress {
            node: node.name.clone(),
        })?
        .to_string();

    Ok(SshLogin {
        node: node.name.clone(),
        host,
        user: node.login_user().map(String::from),
        keyfile: expand_home(keyfile),
    })
}

fn expand_home(path: PathBuf) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::testing::{indexed, instance};

    fn rule(selector: &str, cluster: &str) -> LoginRule {
        LoginRule {
            selector: selector.to_string(),
            login_user: format!("{}-user", cluster),
            keyfile: format!("/keys/{}.pem", cluster),
            member_of: cluster.to_string(),
        }
    }

    fn fleet() -> Vec<Node> {
        indexed(vec![
            instance("i-1", "api1", "running", &[("env", "prod")]),
            instance("i-2", "api2", "running", &[("env", "dev")]),
            instance("i-3", "batch", "stopped", &[]),
        ])
    }

    #[test]
    fn test_first_match_wins() {
        let mut nodes = fleet();
        let rules = vec![rule("tags=env:prod", "P"), rule("*", "C")];

        assign(&mut nodes, &rules).unwrap();

        assert_eq!(nodes[0].cluster, "P");
        assert_eq!(nodes[0].login.as_ref().unwrap().login_user, "P-user");
        assert_eq!(nodes[1].cluster, "C");
        assert_eq!(nodes[2].cluster, "C");
    }

    #[test]
    fn test_catch_all_first_shadows_everything() {
        let mut nodes = fleet();
        let rules = vec![rule("*", "C"), rule("tags=env:prod", "P")];

        assign(&mut nodes, &rules).unwrap();
        assert!(nodes.iter().all(|n| n.cluster == "C"));
    }

    #[test]
    fn test_unmatched_nodes_stay_unassigned() {
        let mut nodes = fleet();
        assign(&mut nodes, &[rule("api*", "web")]).unwrap();

        assert_eq!(nodes[2].cluster, "");
        assert!(nodes[2].login.is_none());
    }

    #[test]
    fn test_bad_selector_is_an_error() {
        let mut nodes = fleet();
        let err = assign(&mut nodes, &[rule("a=b=c", "x")]).unwrap_err();
        assert!(matches!(err, FleetError::InvalidFilterSyntax { .. }));
    }

    #[test]
    fn test_ssh_login_precedence() {
        let mut nodes = fleet();
        assign(&mut nodes, &[rule("api1", "web")]).unwrap();
        let keyfiles = BTreeMap::from([("fleet".to_string(), PathBuf::from("/keys/fleet.pem"))]);

        // Rule keyfile and user
        let login = ssh_login(&nodes[0], &keyfiles).unwrap();
        assert_eq!(login.keyfile, PathBuf::from("/keys/web.pem"));
        assert_eq!(login.user.as_deref(), Some("web-user"));
        assert_eq!(login.destination(), format!("web-user@{}", login.host));
        assert_eq!(login.host, nodes[0].public_ip());

        // Key mapping, no user
        let login = ssh_login(&nodes[1], &keyfiles).unwrap();
        assert_eq!(login.keyfile, PathBuf::from("/keys/fleet.pem"));
        assert_eq!(login.user, None);
        assert_eq!(login.destination(), login.host);

        // Cluster document override beats the rule
        nodes[0].keyfile = "/keys/override.pem".to_string();
        nodes[0].username = "admin".to_string();
        let login = ssh_login(&nodes[0], &keyfiles).unwrap();
        assert_eq!(login.keyfile, PathBuf::from("/keys/override.pem"));
        assert_eq!(login.user.as_deref(), Some("admin"));
    }

    #[test]
    fn test_ambiguous_login() {
        let nodes = fleet();
        let err = ssh_login(&nodes[1], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, FleetError::AmbiguousLogin { ref node, .. } if node == "api2"));
    }
}
