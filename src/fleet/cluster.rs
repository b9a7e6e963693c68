// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster documents
//!
//! A cluster document names a group of nodes in one region and lists the
//! nodes it expects to find there:
//!
//! ```yaml
//! cloud:
//!   region: eu-central-1
//! cluster:
//!   name: nano1
//!   filter: tags=aws:cloudformation:stack-name:nano1
//! nodes:
//! - nodename: master
//!   instance_type: t2.nano
//!   image: ami-d8203bb4
//!   username: ec2-user
//!   selector: tags=Name:master
//! - nodename: worker
//!   count: 2
//! ```
//!
//! Documents live in ~/.fleetsh/clusters/*.yaml.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One configured node of a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub nodename: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub username: String,
    /// Filter term picking the live instance(s), `tags=Name:<nodename>` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<String>,
    /// Key pair name used when launching this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Number of identical nodes, named `<nodename>0..<nodename>N-1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl NodeSpec {
    /// Selector for this node, explicit or derived from the node name
    pub fn selector(&self) -> String {
        match &self.selector {
            Some(sel) if !sel.trim().is_empty() => sel.trim().to_string(),
            _ => format!("tags=Name:{}", escape_glob(&self.nodename)),
        }
    }

    /// Whether the node is matched through `tags=Name:<nodename>`
    fn uses_derived_selector(&self) -> bool {
        // Clones never keep an explicit selector
        self.count.is_some_and(|c| c > 1)
            || self.selector.as_deref().is_none_or(|s| s.trim().is_empty())
    }
}

/// Make glob metacharacters in `s` match literally
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// On-disk shape of a cluster document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub cloud: CloudSection,
    pub cluster: ClusterSection,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl ClusterDocument {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: ClusterDocument =
            serde_yaml::from_str(content).context("Failed to parse cluster document")?;
        if doc.cluster.name.trim().is_empty() {
            return Err(anyhow!("cluster document has no cluster.name"));
        }
        if doc.cloud.region.trim().is_empty() {
            return Err(anyhow!(
                "cluster '{}' has no cloud.region",
                doc.cluster.name
            ));
        }
        // ':' splits the tag key from the value and ',' splits filter terms
        if let Some(node) = doc
            .nodes
            .iter()
            .find(|n| n.uses_derived_selector() && n.nodename.contains([':', ',']))
        {
            return Err(anyhow!(
                "node '{}' in cluster '{}' cannot be matched by name, give it a selector",
                node.nodename,
                doc.cluster.name
            ));
        }
        Ok(doc)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize cluster document")
    }
}

/// Named grouping of nodes, ready for reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub name: String,
    pub region: String,
    /// Cluster-level filter term; `tags=cluster:<name>` when unset
    pub filter: Option<String>,
    /// Node specs with `count` already expanded
    pub nodes: Vec<NodeSpec>,
}

impl ClusterSpec {
    pub fn filter(&self) -> String {
        match &self.filter {
            Some(f) if !f.trim().is_empty() => f.trim().to_string(),
            _ => format!("tags=cluster:{}", self.name),
        }
    }
}

impl From<ClusterDocument> for ClusterSpec {
    fn from(doc: ClusterDocument) -> Self {
        Self {
            name: doc.cluster.name,
            region: doc.cloud.region,
            filter: doc.cluster.filter,
            nodes: expand_clones(doc.nodes),
        }
    }
}

/// Expand `count: N` entries into N individually named specs
pub fn expand_clones(nodes: Vec<NodeSpec>) -> Vec<NodeSpec> {
    let mut expanded = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node.count {
            Some(count) if count > 1 => {
                for i in 0..count {
                    let mut clone = node.clone();
                    clone.count = None;
                    clone.nodename = format!("{}{}", node.nodename, i);
                    // An explicit selector would claim the same instances for every clone
                    clone.selector = None;
                    expanded.push(clone);
                }
            }
            _ => {
                let mut single = node;
                single.count = None;
                expanded.push(single);
            }
        }
    }
    expanded
}

/// Directory holding cluster documents (~/.fleetsh/clusters/)
pub fn clusters_dir() -> Result<PathBuf> {
    Ok(crate::config::base_dir()?.join("clusters"))
}

/// Load every `*.yaml`/`*.yml` document in `dir`
///
/// A missing directory is not an error. Unparseable documents are skipped
/// with a warning so one bad file does not hide the others.
pub fn load_cluster_specs(dir: &Path) -> Result<Vec<ClusterSpec>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read cluster directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml")
        })
        .collect();
    paths.sort();

    let mut specs: Vec<ClusterSpec> = Vec::new();
    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cluster document");
                continue;
            }
        };
        match ClusterDocument::from_yaml(&content) {
            Ok(doc) => {
                let spec = ClusterSpec::from(doc);
                if specs.iter().any(|s| s.name == spec.name) {
                    warn!(cluster = %spec.name, path = %path.display(), "Duplicate cluster name, ignoring");
                    continue;
                }
                debug!(cluster = %spec.name, nodes = spec.nodes.len(), "Loaded cluster document");
                specs.push(spec);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "Skipping cluster document");
            }
        }
    }

    Ok(specs)
}

/// Write a cluster document as `<dir>/<name>.yaml`, returning the path
pub fn save_cluster_document(dir: &Path, doc: &ClusterDocument) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create cluster directory {}", dir.display()))?;
    let path = dir.join(format!("{}.yaml", doc.cluster.name));
    crate::config::atomic_write(&path, doc.to_yaml()?.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NANO1: &str = r#"
cloud:
  provider: ec2
  region: eu-central-1
cluster:
  filter: tags=aws:cloudformation:stack-name:nano1
  name: nano1
nodes:
- image: ami-d8203bb4
  instance_type: t2.nano
  nodename: master
  selector: tags=Name:master
  username: ec2-user
- image: ami-d8203bb4
  instance_type: t2.nano
  nodename: worker
  count: 2
  username: ec2-user
"#;

    #[test]
    fn test_parse_document() {
        let doc = ClusterDocument::from_yaml(NANO1).unwrap();
        assert_eq!(doc.cluster.name, "nano1");
        assert_eq!(doc.cloud.region, "eu-central-1");
        assert_eq!(doc.nodes.len(), 2);
    }

    #[test]
    fn test_spec_expands_clones() {
        let spec = ClusterSpec::from(ClusterDocument::from_yaml(NANO1).unwrap());
        let names: Vec<_> = spec.nodes.iter().map(|n| n.nodename.as_str()).collect();
        assert_eq!(names, vec!["master", "worker0", "worker1"]);
        assert!(spec.nodes.iter().all(|n| n.count.is_none()));
        assert_eq!(spec.nodes[1].selector(), "tags=Name:worker0");
    }

    #[test]
    fn test_default_filters() {
        let spec = ClusterSpec {
            name: "web".to_string(),
            region: "us-east-1".to_string(),
            filter: None,
            nodes: vec![],
        };
        assert_eq!(spec.filter(), "tags=cluster:web");

        let node = NodeSpec {
            nodename: "db".to_string(),
            ..Default::default()
        };
        assert_eq!(node.selector(), "tags=Name:db");
    }

    #[test]
    fn test_derived_selector_matches_name_literally() {
        let node = NodeSpec {
            nodename: "web[1]*?".to_string(),
            ..Default::default()
        };
        assert_eq!(node.selector(), "tags=Name:web[[]1][*][?]");
    }

    #[test]
    fn test_node_name_with_separator_needs_selector() {
        let doc = |nodes: &str| format!("cloud: {{region: x}}\ncluster: {{name: c}}\nnodes:\n{}", nodes);

        let err = ClusterDocument::from_yaml(&doc("- nodename: 'db:1'\n")).unwrap_err();
        assert!(err.to_string().contains("db:1"));
        assert!(ClusterDocument::from_yaml(&doc("- nodename: 'a,b'\n")).is_err());
        // Clones drop the explicit selector
        assert!(ClusterDocument::from_yaml(&doc("- {nodename: 'db:', selector: id=i-1, count: 2}\n")).is_err());

        let ok = ClusterDocument::from_yaml(&doc("- {nodename: 'db:1', selector: id=i-1}\n")).unwrap();
        assert_eq!(ok.nodes[0].selector(), "id=i-1");
    }

    #[test]
    fn test_missing_name_rejected() {
        let result = ClusterDocument::from_yaml("cloud: {region: x}\ncluster: {name: ''}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_skips_bad_documents() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("nano1.yaml"), NANO1).unwrap();
        std::fs::write(temp_dir.path().join("broken.yaml"), "cloud: [").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let specs = load_cluster_specs(temp_dir.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "nano1");
    }

    #[test]
    fn test_load_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let specs = load_cluster_specs(&temp_dir.path().join("nope")).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let doc = ClusterDocument::from_yaml(NANO1).unwrap();

        let path = save_cluster_document(temp_dir.path(), &doc).unwrap();
        assert!(path.ends_with("nano1.yaml"));

        let specs = load_cluster_specs(temp_dir.path()).unwrap();
        assert_eq!(specs[0].nodes.len(), 3);
    }
}
