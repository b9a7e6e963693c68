// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Test fixtures: instance builders and a recording provider

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::login::SshLogin;
use super::node::{InstanceState, Node};
use super::provider::{CloudProvider, InstanceRecord, LaunchRequest};
use super::ssh::{RefreshCallback, RemoteOutput, RemoteShell};

pub fn state(s: &str) -> InstanceState {
    serde_json::from_value(serde_json::Value::String(s.to_string())).expect("valid state")
}

/// Instance named through its `Name` tag
pub fn instance(id: &str, name: &str, lifecycle: &str, tags: &[(&str, &str)]) -> InstanceRecord {
    let mut record = InstanceRecord {
        id: id.to_string(),
        state: state(lifecycle),
        instance_type: "t2.micro".to_string(),
        image_id: "ami-test".to_string(),
        public_ip: format!("10.0.0.{}", id.len()),
        private_ip: "172.16.0.1".to_string(),
        key_name: "fleet".to_string(),
        ..Default::default()
    };
    record.tags.insert("Name".to_string(), name.to_string());
    for (k, v) in tags {
        record.tags.insert(k.to_string(), v.to_string());
    }
    record
}

/// Hydrate records and number them 1..N in order
pub fn indexed(records: Vec<InstanceRecord>) -> Vec<Node> {
    records
        .into_iter()
        .enumerate()
        .map(|(pos, record)| {
            let mut node = Node::hydrated(record, pos);
            node.index = pos + 1;
            node
        })
        .collect()
}

/// Provider call as recorded by `MockProvider`
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(Vec<String>),
    Stop(Vec<String>),
    Terminate(Vec<String>),
    CreateTags(Vec<String>, BTreeMap<String, String>),
    DeleteTags(Vec<String>, BTreeMap<String, String>),
    Launch(LaunchRequest),
}

/// Serves a fixed inventory and records everything else
#[derive(Default)]
pub struct MockProvider {
    instances: Mutex<BTreeMap<String, Vec<InstanceRecord>>>,
    list_calls: AtomicUsize,
    fail_next_list: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl MockProvider {
    pub fn with_region(region: &str, instances: Vec<InstanceRecord>) -> Self {
        let provider = Self::default();
        provider.set_instances(region, instances);
        provider
    }

    pub fn set_instances(&self, region: &str, instances: Vec<InstanceRecord>) {
        self.instances
            .lock()
            .unwrap()
            .insert(region.to_string(), instances);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_list(&self) {
        self.fail_next_list.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn list_instances(&self, region: &str) -> Result<Vec<InstanceRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("RequestLimitExceeded"));
        }
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(region)
            .cloned()
            .unwrap_or_default())
    }

    async fn start_instances(&self, _region: &str, ids: &[String]) -> Result<()> {
        self.record(Call::Start(ids.to_vec()));
        Ok(())
    }

    async fn stop_instances(&self, _region: &str, ids: &[String]) -> Result<()> {
        self.record(Call::Stop(ids.to_vec()));
        Ok(())
    }

    async fn terminate_instances(&self, _region: &str, ids: &[String]) -> Result<()> {
        self.record(Call::Terminate(ids.to_vec()));
        Ok(())
    }

    async fn create_tags(
        &self,
        _region: &str,
        ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.record(Call::CreateTags(ids.to_vec(), tags.clone()));
        Ok(())
    }

    async fn delete_tags(
        &self,
        _region: &str,
        ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.record(Call::DeleteTags(ids.to_vec(), tags.clone()));
        Ok(())
    }

    async fn launch_instance(&self, _region: &str, request: &LaunchRequest) -> Result<String> {
        self.record(Call::Launch(request.clone()));
        Ok(format!("i-launched-{}", request.name))
    }
}

/// Remote shell that records what it was asked to do
#[derive(Default)]
pub struct MockShell {
    commands: Mutex<Vec<(String, String)>>,
    shells: Mutex<Vec<String>>,
    transfers: Mutex<Vec<(String, String)>>,
}

impl MockShell {
    /// (node, command) pairs in call order
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn shells(&self) -> Vec<String> {
        self.shells.lock().unwrap().clone()
    }

    /// (node, path) pairs for put and get
    pub fn transfers(&self) -> Vec<(String, String)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn run_command(&self, login: &SshLogin, command: &str) -> Result<RemoteOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((login.node.clone(), command.to_string()));
        Ok(RemoteOutput {
            stdout: format!("{}\n", login.node),
            stderr: String::new(),
            status: Some(0),
        })
    }

    async fn open_shell(&self, login: &SshLogin) -> Result<()> {
        self.shells.lock().unwrap().push(login.node.clone());
        Ok(())
    }

    async fn put_file(&self, login: &SshLogin, local: &Path, _remote_dir: &str) -> Result<()> {
        self.transfers
            .lock()
            .unwrap()
            .push((login.node.clone(), local.display().to_string()));
        Ok(())
    }

    async fn get_file(&self, login: &SshLogin, remote: &str, _local_dir: &Path) -> Result<()> {
        self.transfers
            .lock()
            .unwrap()
            .push((login.node.clone(), remote.to_string()));
        Ok(())
    }

    fn set_refresh_callback(&self, _callback: RefreshCallback) {}
}
