// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Lifecycle and tag operations
//!
//! Planning is pure: it decides per node whether the operation applies, is a
//! no-op for the node's current state, or cannot apply at all. Execution then
//! issues one batched provider call per operation. Invalidating the cache
//! afterwards is the caller's job (see `TargetingEngine::apply`).

use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use super::node::{InstanceState, Node};
use super::provider::{CloudProvider, LaunchRequest};
use crate::error::FleetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Terminate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Terminate => "terminate",
        }
    }

    /// Operations that need an explicit confirmation
    pub fn is_destructive(&self) -> bool {
        matches!(self, Operation::Stop | Operation::Terminate)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node left out of a plan and the reason
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub node: String,
    pub reason: String,
}

/// What an operation will do to a set of nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub operation: Operation,
    /// Instance ids for the batched lifecycle call
    pub ids: Vec<String>,
    /// Absent nodes to launch (start only)
    pub launches: Vec<LaunchRequest>,
    pub skipped: Vec<Skipped>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.launches.is_empty()
    }
}

/// Work out which nodes an operation applies to
///
/// `default_key` is the key pair used to launch absent nodes whose cluster
/// entry names none.
pub fn plan(operation: Operation, nodes: &[Node], default_key: Option<&str>) -> Plan {
    let mut plan = Plan {
        operation,
        ids: Vec::new(),
        launches: Vec::new(),
        skipped: Vec::new(),
    };

    for node in nodes {
        let state = node.lifecycle();
        let skip = |reason: &str| Skipped {
            node: node.name.clone(),
            reason: reason.to_string(),
        };

        if state.is_gone() {
            plan.skipped.push(skip(&format!("instance is {}", state)));
            continue;
        }

        match (operation, state) {
            (Operation::Start, InstanceState::Absent) => match launch_request(node, default_key) {
                Some(request) => plan.launches.push(request),
                None => plan.skipped.push(skip("no key pair to launch with, set default_key")),
            },
            (_, InstanceState::Absent) => plan.skipped.push(skip("not launched")),
            (Operation::Start, InstanceState::Running | InstanceState::Pending) => {
                plan.skipped.push(skip("already running"))
            }
            (Operation::Start, InstanceState::Stopping) => plan.skipped.push(skip("still stopping")),
            (Operation::Stop, InstanceState::Stopped | InstanceState::Stopping) => {
                plan.skipped.push(skip("already stopped"))
            }
            _ => plan.ids.push(node.id().to_string()),
        }
    }

    plan
}

fn launch_request(node: &Node, default_key: Option<&str>) -> Option<LaunchRequest> {
    let spec = node.spec()?;
    let key_name = spec
        .key
        .as_deref()
        .or(default_key)
        .filter(|k| !k.is_empty())?;

    Some(LaunchRequest {
        name: node.name.clone(),
        cluster: node.cluster.clone(),
        image: spec.image.clone(),
        instance_type: spec.instance_type.clone(),
        key_name: key_name.to_string(),
    })
}

/// Run a plan against the provider, returning the ids of launched instances
pub async fn execute(
    plan: &Plan,
    region: &str,
    provider: &dyn CloudProvider,
) -> Result<Vec<String>, FleetError> {
    for skipped in &plan.skipped {
        info!(node = %skipped.node, operation = %plan.operation, "Skipping: {}", skipped.reason);
    }

    if !plan.ids.is_empty() {
        let result = match plan.operation {
            Operation::Start => provider.start_instances(region, &plan.ids).await,
            Operation::Stop => provider.stop_instances(region, &plan.ids).await,
            Operation::Terminate => provider.terminate_instances(region, &plan.ids).await,
        };
        result.map_err(|e| FleetError::provider(region, &e))?;
        info!(region = %region, operation = %plan.operation, count = plan.ids.len(), "Lifecycle call issued");
    }

    let mut launched = Vec::with_capacity(plan.launches.len());
    for request in &plan.launches {
        let id = provider
            .launch_instance(region, request)
            .await
            .map_err(|e| FleetError::provider(region, &e))?;
        info!(region = %region, node = %request.name, id = %id, "Launched node");
        launched.push(id);
    }

    Ok(launched)
}

/// Parse `k=v[,k=v...]` into a tag map
///
/// Keys starting with `aws` are reserved by the provider and rejected. With
/// `allow_bare_keys`, `k` alone means "any value" (used for untagging).
pub fn parse_tags(spec: &str, allow_bare_keys: bool) -> Result<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();

    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = match item.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None if allow_bare_keys => (item, ""),
            None => bail!("tag '{}' is not in key=value form", item),
        };
        if key.is_empty() {
            bail!("tag '{}' has an empty key", item);
        }
        if key.to_ascii_lowercase().starts_with("aws") {
            bail!("tag key '{}' is reserved", key);
        }
        tags.insert(key.to_string(), value.to_string());
    }

    if tags.is_empty() {
        bail!("no tags given");
    }
    Ok(tags)
}

/// Ids of the nodes a tag change can apply to; absent and gone nodes are skipped
pub fn taggable_ids(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| {
            let ok = n.is_hydrated() && !n.lifecycle().is_gone();
            if !ok {
                warn!(node = %n.name, state = %n.lifecycle(), "Not tagging");
            }
            ok
        })
        .map(|n| n.id().to_string())
        .collect()
}
