// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! use, clusters and rules

use anyhow::{Result, bail};
use async_trait::async_trait;
use console::style;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{Command, Session, split_command};
use crate::fleet::cluster::{CloudSection, ClusterSection, save_cluster_document};
use crate::fleet::{ClusterDocument, ClusterSpec, Node, NodeSpec};
use crate::output::Verbosity;

pub(super) fn commands() -> Vec<Arc<dyn Command>> {
    vec![Arc::new(Use), Arc::new(Clusters), Arc::new(Rules)]
}

/// Name of a cluster built by `use filter` until the operator names it
const UNSAVED_CLUSTER: &str = "user_selected";

struct Use;

#[async_trait]
impl Command for Use {
    fn name(&self) -> &'static str {
        "use"
    }

    fn usage(&self) -> &'static str {
        "use [region <region> | cluster <name> | filter <filter>] - select the working set"
    }

    fn help(&self) -> &'static str {
        "After 'use', commands with an empty or '*' target apply to the selected nodes.\n\
         'use filter' turns the matching nodes into a cluster, asks for the ssh login\n\
         user and optionally saves the cluster document.\n\n\
         Examples:\n  use region us-east-1\n  use cluster nano1\n  use filter tags=env:dev"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let (what, value) = split_command(args);
        match (what, value) {
            ("", _) => {
                match session.engine.scope() {
                    Some(scope) => println!("Using {}", scope),
                    None => println!("No region selected"),
                }
                Ok(())
            }
            ("region", "") => {
                match session.engine.scope() {
                    Some(scope) => println!("Current region is {}", scope.region),
                    None => println!("No region selected"),
                }
                Ok(())
            }
            ("region", region) => use_region(session, region),
            ("cluster", name) if !name.is_empty() => use_cluster(session, name).await,
            ("filter", filter) if !filter.is_empty() => use_filter(session, filter).await,
            _ => bail!("usage: {}", self.usage()),
        }
    }
}

fn use_region(session: &mut Session, region: &str) -> Result<()> {
    session.engine.use_region(region);
    session.config.region = Some(region.to_string());
    session.config.cluster = None;
    session.save_config()?;
    println!("Using region {}", region);
    Ok(())
}

async fn use_cluster(session: &mut Session, name: &str) -> Result<()> {
    session.engine.use_cluster(name)?;
    let region = session.engine.cluster(name)?.region.clone();
    session.config.region = Some(region);
    session.config.cluster = Some(name.to_string());
    session.save_config()?;

    let nodes = session.any_nodes("*").await?;
    session.print_nodes(&nodes, Verbosity::Normal);

    let absent = session.engine.absent_count();
    if absent > 0 {
        info!(absent, "Configured nodes that match no instance");
    }
    let unclaimed = nodes.iter().filter(|n| n.cluster.is_empty()).count();
    if unclaimed > 0 {
        info!(unclaimed, "Instances in the region that are not part of this cluster");
    }
    Ok(())
}

/// Cluster document pinning the given nodes by instance id
fn document_from_nodes(region: &str, nodes: &[Node], login_user: &str) -> ClusterDocument {
    let live: Vec<&Node> = nodes.iter().filter(|n| n.is_hydrated()).collect();
    let filter = live
        .iter()
        .map(|n| format!("id={}", n.id()))
        .collect::<Vec<_>>()
        .join(",");

    ClusterDocument {
        cloud: CloudSection {
            provider: None,
            region: region.to_string(),
        },
        cluster: ClusterSection {
            name: UNSAVED_CLUSTER.to_string(),
            filter: Some(filter),
        },
        nodes: live
            .iter()
            .map(|n| NodeSpec {
                nodename: n.name.clone(),
                instance_type: n.instance_type().to_string(),
                image: n.image().to_string(),
                username: login_user.to_string(),
                selector: Some(format!("id={}", n.id())),
                ..Default::default()
            })
            .collect(),
    }
}

async fn use_filter(session: &mut Session, filter: &str) -> Result<()> {
    let nodes = session.any_nodes(filter).await?;
    if nodes.iter().all(|n| !n.is_hydrated()) {
        info!(filter = %filter, "No instances to build a cluster from");
        return Ok(());
    }
    session.print_nodes(&nodes, Verbosity::Normal);

    let login_user = session
        .prompter
        .read_line("Ssh login user: ")
        .unwrap_or_default()
        .trim()
        .to_string();

    let region = match session.engine.scope() {
        Some(scope) => scope.region.clone(),
        None => bail!(crate::error::FleetError::NoCloudScope),
    };
    let mut doc = document_from_nodes(&region, &nodes, &login_user);

    session.engine.add_cluster(ClusterSpec::from(doc.clone()));
    session.engine.use_cluster(UNSAVED_CLUSTER)?;
    let nodes = session.any_nodes("*").await?;
    session.print_nodes(&nodes, Verbosity::Normal);

    if !session.confirm("Save cluster document") {
        info!("Using unsaved cluster, 'use filter' again and save it to keep it");
        return Ok(());
    }

    let name = session
        .prompter
        .read_line("Name this cluster: ")
        .unwrap_or_default()
        .trim()
        .to_string();
    if name.is_empty() {
        info!("No name given, cluster not saved");
        return Ok(());
    }

    doc.cluster.name = name.clone();
    session.engine.add_cluster(ClusterSpec::from(doc.clone()));
    session.engine.use_cluster(&name)?;

    if let Some(dir) = &session.clusters_dir {
        let path = save_cluster_document(dir, &doc)?;
        info!(cluster = %name, path = %path.display(), "Saved cluster document, edit it to rename nodes");
    }
    session.config.region = Some(region);
    session.config.cluster = Some(name);
    session.save_config()?;
    session.ok();
    Ok(())
}

struct Clusters;

#[async_trait]
impl Command for Clusters {
    fn name(&self) -> &'static str {
        "clusters"
    }

    fn usage(&self) -> &'static str {
        "clusters - list cluster documents by region"
    }

    async fn run(&self, _args: &str, session: &mut Session) -> Result<()> {
        let active = session.engine.scope().and_then(|s| s.cluster.clone());

        let mut by_region: BTreeMap<&str, Vec<&ClusterSpec>> = BTreeMap::new();
        for spec in session.engine.clusters() {
            by_region.entry(&spec.region).or_default().push(spec);
        }

        if by_region.is_empty() {
            println!("No clusters defined");
            return Ok(());
        }

        for (region, specs) in by_region {
            println!("Region: {}", style(region).cyan());
            for spec in specs {
                let marker = if active.as_deref() == Some(spec.name.as_str()) { "*" } else { " " };
                println!(" {} {} ({} nodes)", marker, spec.name, spec.nodes.len());
            }
        }
        Ok(())
    }
}

struct Rules;

#[async_trait]
impl Command for Rules {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn usage(&self) -> &'static str {
        "rules - list login rules in precedence order"
    }

    fn help(&self) -> &'static str {
        "Each node takes the first rule whose selector matches it. Rules are set in\n\
         ~/.fleetsh/config.json under login_rules."
    }

    async fn run(&self, _args: &str, session: &mut Session) -> Result<()> {
        let rules = session.engine.rules();
        if rules.is_empty() {
            println!("No login rules");
            return Ok(());
        }

        for (idx, rule) in rules.iter().enumerate() {
            println!(
                "{:>3}. {} -> user={} keyfile={} cluster={}",
                idx + 1,
                style(&rule.selector).yellow(),
                or_dash(&rule.login_user),
                or_dash(&rule.keyfile),
                or_dash(&rule.member_of),
            );
        }
        Ok(())
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{REGION, provider, session};
    use crate::config::Config;
    use crate::fleet::cluster::load_cluster_specs;
    use crate::fleet::testing::MockShell;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_use_region_persists() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &[]);
        session.config_path = Some(temp_dir.path().join("config.json"));

        Use.run("region us-east-1", &mut session).await.unwrap();

        assert_eq!(session.engine.scope().unwrap().region, "us-east-1");
        let saved = Config::load_from(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(saved.region.as_deref(), Some("us-east-1"));
        assert_eq!(provider.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_use_unknown_cluster() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &[]);

        let err = Use.run("cluster nope", &mut session).await.unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[tokio::test]
    async fn test_use_bad_subcommand() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &[]);

        assert!(Use.run("template x.yaml", &mut session).await.is_err());
        assert!(Use.run("", &mut session).await.is_ok());
    }

    #[test]
    fn test_document_from_nodes() {
        let nodes = crate::fleet::testing::indexed(vec![
            crate::fleet::testing::instance("i-1", "web1", "running", &[]),
            crate::fleet::testing::instance("i-2", "web2", "stopped", &[]),
        ]);
        let doc = document_from_nodes(REGION, &nodes, "ubuntu");

        assert_eq!(doc.cluster.filter.as_deref(), Some("id=i-1,id=i-2"));
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.nodes[0].selector.as_deref(), Some("id=i-1"));
        assert_eq!(doc.nodes[1].username, "ubuntu");
    }

    #[tokio::test]
    async fn test_use_filter_builds_and_saves_cluster() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &["ec2-user", "y", "workers"]);
        session.clusters_dir = Some(temp_dir.path().to_path_buf());

        Use.run("filter worker*", &mut session).await.unwrap();

        let scope = session.engine.scope().unwrap();
        assert_eq!(scope.cluster.as_deref(), Some("workers"));

        let nodes = session.engine.resolve_targets("workers", false).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.login_user() == Some("ec2-user")));

        let saved = load_cluster_specs(temp_dir.path()).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "workers");
        assert_eq!(session.config.cluster.as_deref(), Some("workers"));
    }

    #[tokio::test]
    async fn test_use_filter_without_saving() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &["", "n"]);

        Use.run("filter master", &mut session).await.unwrap();
        assert_eq!(
            session.engine.scope().unwrap().cluster.as_deref(),
            Some(UNSAVED_CLUSTER)
        );
        assert!(session.config.cluster.is_none());
    }
}
