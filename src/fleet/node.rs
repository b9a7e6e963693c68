// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Fleet node model
//!
//! A node is either backed by a live provider record (hydrated) or synthesized
//! from a cluster document entry that matched nothing (absent). Both shapes
//! answer the same accessors so the matcher, the tables and the operations
//! never have to care which one they hold.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::cluster::NodeSpec;
use super::login::LoginRule;
use super::provider::InstanceRecord;

/// Instance lifecycle state as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    /// No instance exists (configured node never launched)
    #[default]
    Absent,
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Absent => "absent",
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
        }
    }

    /// Terminated or on its way there; no operation applies any more
    pub fn is_gone(&self) -> bool {
        matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node attributes addressable from filter expressions (`<attr>=<glob>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Id,
    Name,
    State,
    InstanceType,
    Image,
    PublicIp,
    PrivateIp,
    PublicDns,
    VpcId,
    SubnetId,
    KeyName,
    LaunchTime,
    SecurityGroups,
    Cluster,
    Username,
}

/// Friendly names and canonical field names for every attribute
static ATTRIBUTE_ALIASES: LazyLock<HashMap<&'static str, Attribute>> = LazyLock::new(|| {
    use Attribute::*;
    HashMap::from([
        ("id", Id),
        ("instance_id", Id),
        ("name", Name),
        ("state", State),
        ("type", InstanceType),
        ("instance_type", InstanceType),
        ("image", Image),
        ("image_id", Image),
        ("ip", PublicIp),
        ("public_ip", PublicIp),
        ("ip_address", PublicIp),
        ("ext_ip", PublicIp),
        ("private_ip", PrivateIp),
        ("private_ip_address", PrivateIp),
        ("int_ip", PrivateIp),
        ("dns", PublicDns),
        ("hostname", PublicDns),
        ("public_dns", PublicDns),
        ("public_dns_name", PublicDns),
        ("vpc", VpcId),
        ("vpc_id", VpcId),
        ("subnet", SubnetId),
        ("subnet_id", SubnetId),
        ("key", KeyName),
        ("key_name", KeyName),
        ("launch_time", LaunchTime),
        ("launched", LaunchTime),
        ("sg", SecurityGroups),
        ("secgroups", SecurityGroups),
        ("security_groups", SecurityGroups),
        ("cluster", Cluster),
        ("user", Username),
        ("username", Username),
    ])
});

impl Attribute {
    /// Full catalogue, in display order
    pub const ALL: [Attribute; 15] = [
        Attribute::Id,
        Attribute::Name,
        Attribute::State,
        Attribute::InstanceType,
        Attribute::Image,
        Attribute::PublicIp,
        Attribute::PrivateIp,
        Attribute::PublicDns,
        Attribute::VpcId,
        Attribute::SubnetId,
        Attribute::KeyName,
        Attribute::LaunchTime,
        Attribute::SecurityGroups,
        Attribute::Cluster,
        Attribute::Username,
    ];

    /// Resolve a user-typed attribute key (case-insensitive)
    pub fn lookup(key: &str) -> Option<Attribute> {
        ATTRIBUTE_ALIASES
            .get(key.trim().to_ascii_lowercase().as_str())
            .copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Attribute::Id => "id",
            Attribute::Name => "name",
            Attribute::State => "state",
            Attribute::InstanceType => "instance_type",
            Attribute::Image => "image",
            Attribute::PublicIp => "public_ip",
            Attribute::PrivateIp => "private_ip",
            Attribute::PublicDns => "public_dns",
            Attribute::VpcId => "vpc_id",
            Attribute::SubnetId => "subnet_id",
            Attribute::KeyName => "key_name",
            Attribute::LaunchTime => "launch_time",
            Attribute::SecurityGroups => "security_groups",
            Attribute::Cluster => "cluster",
            Attribute::Username => "username",
        }
    }
}

/// Where a node's data comes from
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    /// Backed by an instance currently reported by the provider
    Hydrated(InstanceRecord),
    /// Configured in a cluster document but not found in the inventory
    Absent(NodeSpec),
}

/// One member of the working set
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Display name (Name tag, cluster document nodename, or `node<N>`)
    pub name: String,
    /// 1-based display index, 0 until indexed. Only valid for one resolution pass.
    pub index: usize,
    /// Cluster label, empty when unassigned
    pub cluster: String,
    /// First login rule that matched this node
    pub login: Option<LoginRule>,
    /// Login user override from a cluster document
    pub username: String,
    /// Keyfile override from a cluster document
    pub keyfile: String,
    pub state: NodeState,
}

impl Node {
    /// Wrap a provider record. `position` is the record's place in the region
    /// listing and only feeds the fallback name of untagged instances.
    pub fn hydrated(record: InstanceRecord, position: usize) -> Self {
        let name = tag_value(&record.tags, "name")
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("node{}", position));

        Self {
            name,
            index: 0,
            cluster: String::new(),
            login: None,
            username: String::new(),
            keyfile: String::new(),
            state: NodeState::Hydrated(record),
        }
    }

    /// Placeholder for a configured node without a live instance
    pub fn absent(spec: NodeSpec, cluster: &str) -> Self {
        Self {
            name: spec.nodename.clone(),
            index: 0,
            cluster: cluster.to_string(),
            login: None,
            username: spec.username.clone(),
            keyfile: spec.keyfile.clone().unwrap_or_default(),
            state: NodeState::Absent(spec),
        }
    }

    pub fn is_hydrated(&self) -> bool {
        matches!(self.state, NodeState::Hydrated(_))
    }

    pub fn record(&self) -> Option<&InstanceRecord> {
        match &self.state {
            NodeState::Hydrated(record) => Some(record),
            NodeState::Absent(_) => None,
        }
    }

    pub fn spec(&self) -> Option<&NodeSpec> {
        match &self.state {
            NodeState::Hydrated(_) => None,
            NodeState::Absent(spec) => Some(spec),
        }
    }

    /// Provider instance id, empty for absent nodes
    pub fn id(&self) -> &str {
        self.record().map(|r| r.id.as_str()).unwrap_or("")
    }

    pub fn lifecycle(&self) -> InstanceState {
        match &self.state {
            NodeState::Hydrated(record) => record.state,
            NodeState::Absent(_) => InstanceState::Absent,
        }
    }

    pub fn instance_type(&self) -> &str {
        match &self.state {
            NodeState::Hydrated(record) => &record.instance_type,
            NodeState::Absent(spec) => &spec.instance_type,
        }
    }

    pub fn image(&self) -> &str {
        match &self.state {
            NodeState::Hydrated(record) => &record.image_id,
            NodeState::Absent(spec) => &spec.image,
        }
    }

    pub fn key_name(&self) -> &str {
        match &self.state {
            NodeState::Hydrated(record) => &record.key_name,
            NodeState::Absent(spec) => spec.key.as_deref().unwrap_or(""),
        }
    }

    pub fn vpc_id(&self) -> &str {
        self.record().map(|r| r.vpc_id.as_str()).unwrap_or("")
    }

    pub fn public_ip(&self) -> &str {
        self.record().map(|r| r.public_ip.as_str()).unwrap_or("")
    }

    pub fn private_ip(&self) -> &str {
        self.record().map(|r| r.private_ip.as_str()).unwrap_or("")
    }

    /// Tags of the backing instance; absent nodes have none
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.record()
            .into_iter()
            .flat_map(|r| r.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Address to reach the node over ssh, public first
    pub fn address(&self) -> Option<&str> {
        let record = self.record()?;
        [&record.public_ip, &record.private_ip, &record.public_dns]
            .into_iter()
            .find(|a| !a.is_empty())
            .map(|a| a.as_str())
    }

    /// Effective login user: cluster document override, then login rule
    pub fn login_user(&self) -> Option<&str> {
        if !self.username.is_empty() {
            return Some(&self.username);
        }
        self.login
            .as_ref()
            .map(|rule| rule.login_user.as_str())
            .filter(|u| !u.is_empty())
    }

    /// Stringified attribute value, empty when the node has no such data
    pub fn attribute(&self, attr: Attribute) -> String {
        match attr {
            Attribute::Name => self.name.clone(),
            Attribute::State => self.lifecycle().to_string(),
            Attribute::InstanceType => self.instance_type().to_string(),
            Attribute::Image => self.image().to_string(),
            Attribute::KeyName => self.key_name().to_string(),
            Attribute::Cluster => self.cluster.clone(),
            Attribute::Username => self.login_user().unwrap_or("").to_string(),
            Attribute::Id => self.id().to_string(),
            Attribute::PublicIp => self.public_ip().to_string(),
            Attribute::PrivateIp => self.private_ip().to_string(),
            Attribute::VpcId => self.vpc_id().to_string(),
            Attribute::PublicDns => self
                .record()
                .map(|r| r.public_dns.clone())
                .unwrap_or_default(),
            Attribute::SubnetId => self
                .record()
                .map(|r| r.subnet_id.clone())
                .unwrap_or_default(),
            Attribute::LaunchTime => self
                .record()
                .map(|r| r.launch_time.clone())
                .unwrap_or_default(),
            Attribute::SecurityGroups => self
                .record()
                .map(|r| r.security_groups.join(","))
                .unwrap_or_default(),
        }
    }
}

fn tag_value<'a>(tags: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}
