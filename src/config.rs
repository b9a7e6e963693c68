// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for fleetsh
//!
//! Stores the selected scope, login rules and key mappings in a config file.
//! All fleetsh data is stored under ~/.fleetsh/:
//! - ~/.fleetsh/config.json - user configuration
//! - ~/.fleetsh/clusters/ - cluster documents
//! - ~/.fleetsh/inventory.yaml - inventory of the file-backed provider
//! - ~/.fleetsh/history - REPL command history
//! - ~/.fleetsh/log/ - log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::fleet::LoginRule;

/// Get the base fleetsh directory (~/.fleetsh/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".fleetsh"))
        .context("Could not determine home directory")
}

/// REPL history file (~/.fleetsh/history)
pub fn history_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("history"))
}

/// Write a file atomically: temp file in the same directory, then rename
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    temp.write_all(contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// fleetsh configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Region selected with `use region`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Cluster selected with `use cluster`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Login rules in precedence order
    #[serde(default)]
    pub login_rules: Vec<LoginRule>,

    /// Key pair name to private key file
    #[serde(default)]
    pub keyfiles: BTreeMap<String, PathBuf>,

    /// Key pair used when launching nodes whose cluster entry names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_key: Option<String>,
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        atomic_write(path, content.as_bytes())
    }

    /// Get the config file path (~/.fleetsh/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }
}
