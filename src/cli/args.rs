// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fleetsh")]
#[command(author, version, about = "Interactive shell for operating a fleet of cloud instances")]
pub struct Args {
    /// Region to work in (overrides the saved scope)
    #[arg(short, long)]
    pub region: Option<String>,

    /// Cluster to work on (overrides the saved scope)
    #[arg(short, long, value_name = "CLUSTER", conflicts_with = "region")]
    pub cluster: Option<String>,

    /// Inventory file for the file-backed provider [default: ~/.fleetsh/inventory.yaml]
    #[arg(short, long, value_name = "FILE")]
    pub inventory: Option<PathBuf>,

    /// Output format for node lists
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Run a single command and exit, e.g. `fleetsh show worker*`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Args {
    /// The trailing words as one command line, None for interactive mode
    pub fn command_line(&self) -> Option<String> {
        if self.command.is_empty() {
            None
        } else {
            Some(self.command.join(" "))
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interactive_by_default() {
        let args = Args::parse_from(["fleetsh"]);
        assert!(args.command_line().is_none());
        assert_eq!(args.output, OutputFormat::Table);
    }

    #[test]
    fn test_trailing_command() {
        let args = Args::parse_from(["fleetsh", "-r", "eu-west-1", "show", "-vv", "worker*"]);
        assert_eq!(args.region.as_deref(), Some("eu-west-1"));
        assert_eq!(args.command_line().as_deref(), Some("show -vv worker*"));
    }

    #[test]
    fn test_region_and_cluster_conflict() {
        assert!(Args::try_parse_from(["fleetsh", "-r", "x", "-c", "y"]).is_err());
    }
}
