// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Rendering of node lists as tables, JSON or YAML

mod json;
mod table;
mod yaml;

pub use json::JsonFormatter;
pub use table::TableFormatter;
pub use yaml::YamlFormatter;

use crate::cli::OutputFormat;
use crate::fleet::{Attribute, Node};

/// How much of each node to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    /// `-v`: adds DNS, image, launch time and tags
    Detailed,
    /// `-vv`: every attribute
    Full,
}

impl Verbosity {
    /// Count of `v` characters in flags like `-v` / `-vv`
    pub fn from_level(level: usize) -> Self {
        match level {
            0 => Verbosity::Normal,
            1 => Verbosity::Detailed,
            _ => Verbosity::Full,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl NodeTable {
    pub fn from_nodes(nodes: &[Node], verbosity: Verbosity) -> Self {
        let attributes = columns_for(verbosity);
        let with_tags = verbosity >= Verbosity::Detailed;

        let mut columns = vec!["#".to_string()];
        columns.extend(attributes.iter().map(|a| a.name().to_string()));
        if with_tags {
            columns.push("tags".to_string());
        }

        let rows = nodes
            .iter()
            .map(|node| {
                let mut row = vec![node.index.to_string()];
                row.extend(attributes.iter().map(|a| node.attribute(*a)));
                if with_tags {
                    let tags: Vec<String> = node.tags().map(|(k, v)| format!("{}={}", k, v)).collect();
                    row.push(tags.join(", "));
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn format(&self, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Table => TableFormatter::format(self),
            OutputFormat::Json => JsonFormatter::format(self),
            OutputFormat::Yaml => YamlFormatter::format(self),
        }
    }

    /// Rows as column-keyed records
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, val)| (col.clone(), serde_json::Value::String(val.clone())))
                    .collect()
            })
            .collect()
    }
}

fn columns_for(verbosity: Verbosity) -> Vec<Attribute> {
    use Attribute::*;
    match verbosity {
        Verbosity::Normal => vec![Cluster, Name, InstanceType, State, Id, PublicIp, PrivateIp],
        Verbosity::Detailed => vec![
            Cluster, Name, InstanceType, State, Id, PublicIp, PrivateIp, PublicDns, Image, LaunchTime,
        ],
        Verbosity::Full => Attribute::ALL.to_vec(),
    }
}
