// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cloud inventory and control interface
//!
//! The engine only needs a handful of provider calls: list a region, flip
//! instance lifecycle, edit tags and launch a configured node. Errors are
//! returned as-is; nothing here retries.
//!
//! `InventoryFileProvider` implements the interface on top of a YAML
//! inventory file so the shell can run without cloud credentials:
//!
//! ```yaml
//! regions:
//!   eu-west-1:
//!   - id: i-0a1b2c
//!     state: running
//!     instance_type: t2.nano
//!     public_ip: 54.12.1.1
//!     tags: {Name: master, cluster: nano1}
//! ```

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::node::InstanceState;

/// Instance as reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceRecord {
    pub id: String,
    pub state: InstanceState,
    pub instance_type: String,
    pub image_id: String,
    pub public_ip: String,
    pub private_ip: String,
    pub public_dns: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub key_name: String,
    pub launch_time: String,
    pub tags: BTreeMap<String, String>,
    pub security_groups: Vec<String>,
}

/// Parameters for launching a configured-but-absent node
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub name: String,
    pub cluster: String,
    pub image: String,
    pub instance_type: String,
    pub key_name: String,
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn list_instances(&self, region: &str) -> Result<Vec<InstanceRecord>>;

    async fn start_instances(&self, region: &str, ids: &[String]) -> Result<()>;

    async fn stop_instances(&self, region: &str, ids: &[String]) -> Result<()>;

    async fn terminate_instances(&self, region: &str, ids: &[String]) -> Result<()>;

    async fn create_tags(
        &self,
        region: &str,
        ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Remove tags; an empty value removes the key whatever its value
    async fn delete_tags(
        &self,
        region: &str,
        ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Launch one instance, returning its id
    async fn launch_instance(&self, region: &str, request: &LaunchRequest) -> Result<String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Inventory {
    #[serde(default)]
    regions: BTreeMap<String, Vec<InstanceRecord>>,
}

/// Provider backed by a YAML inventory file; mutations are written back
pub struct InventoryFileProvider {
    path: PathBuf,
    inventory: Mutex<Inventory>,
}

impl InventoryFileProvider {
    /// Open an inventory file; a missing file starts out empty
    pub fn open(path: &Path) -> Result<Self> {
        let inventory = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read inventory {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse inventory {}", path.display()))?
        } else {
            debug!(path = %path.display(), "Inventory file not found, starting empty");
            Inventory::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            inventory: Mutex::new(inventory),
        })
    }

    /// Default inventory location (~/.fleetsh/inventory.yaml)
    pub fn default_path() -> Result<PathBuf> {
        Ok(crate::config::base_dir()?.join("inventory.yaml"))
    }

    fn persist(&self, inventory: &Inventory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(inventory).context("Failed to serialize inventory")?;
        crate::config::atomic_write(&self.path, content.as_bytes())
    }

    /// Apply `f` to every listed instance, failing before any change if an id is unknown
    async fn update<F>(&self, region: &str, ids: &[String], mut f: F) -> Result<()>
    where
        F: FnMut(&mut InstanceRecord) + Send,
    {
        let mut inventory = self.inventory.lock().await;
        let instances = inventory
            .regions
            .get_mut(region)
            .ok_or_else(|| anyhow!("no instances in region '{}'", region))?;

        if let Some(missing) = ids.iter().find(|id| !instances.iter().any(|i| &i.id == *id)) {
            return Err(anyhow!("instance '{}' not found in {}", missing, region));
        }

        for instance in instances.iter_mut().filter(|i| ids.contains(&i.id)) {
            f(instance);
        }

        self.persist(&inventory)
    }
}

#[async_trait]
impl CloudProvider for InventoryFileProvider {
    async fn list_instances(&self, region: &str) -> Result<Vec<InstanceRecord>> {
        let inventory = self.inventory.lock().await;
        Ok(inventory.regions.get(region).cloned().unwrap_or_default())
    }

    async fn start_instances(&self, region: &str, ids: &[String]) -> Result<()> {
        self.update(region, ids, |i| {
            if i.state == InstanceState::Stopped || i.state == InstanceState::Stopping {
                i.state = InstanceState::Running;
            }
        })
        .await
    }

    async fn stop_instances(&self, region: &str, ids: &[String]) -> Result<()> {
        self.update(region, ids, |i| {
            if i.state == InstanceState::Running || i.state == InstanceState::Pending {
                i.state = InstanceState::Stopped;
            }
        })
        .await
    }

    async fn terminate_instances(&self, region: &str, ids: &[String]) -> Result<()> {
        self.update(region, ids, |i| {
            i.state = InstanceState::Terminated;
            i.public_ip.clear();
        })
        .await
    }

    async fn create_tags(
        &self,
        region: &str,
        ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.update(region, ids, |i| {
            for (k, v) in tags {
                i.tags.insert(k.clone(), v.clone());
            }
        })
        .await
    }

    async fn delete_tags(
        &self,
        region: &str,
        ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.update(region, ids, |i| {
            for (k, v) in tags {
                if v.is_empty() || i.tags.get(k) == Some(v) {
                    i.tags.remove(k);
                }
            }
        })
        .await
    }

    async fn launch_instance(&self, region: &str, request: &LaunchRequest) -> Result<String> {
        let mut inventory = self.inventory.lock().await;
        let total: usize = inventory.regions.values().map(Vec::len).sum();
        let id = format!("i-{:08x}", total + 1);

        let mut tags = BTreeMap::new();
        tags.insert("Name".to_string(), request.name.clone());
        if !request.cluster.is_empty() {
            tags.insert("cluster".to_string(), request.cluster.clone());
        }

        inventory
            .regions
            .entry(region.to_string())
            .or_default()
            .push(InstanceRecord {
                id: id.clone(),
                state: InstanceState::Pending,
                instance_type: request.instance_type.clone(),
                image_id: request.image.clone(),
                key_name: request.key_name.clone(),
                tags,
                ..Default::default()
            });

        self.persist(&inventory)?;
        info!(region = %region, id = %id, name = %request.name, "Launched instance");
        Ok(id)
    }
}
