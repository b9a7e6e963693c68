// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Remote shell access to nodes
//!
//! `RemoteShell` is the seam to whatever runs commands on nodes. `OpenSsh`
//! drives the local `ssh`/`scp` binaries. Batch helpers resolve the login of
//! every node first; a node whose login cannot be resolved fails on its own
//! without holding up the rest of the batch.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, warn};

use super::login::{SshLogin, ssh_login};
use super::node::Node;

/// Called after remote activity so the prompt can be redrawn
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, None when killed by a signal
    pub status: Option<i32>,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run_command(&self, login: &SshLogin, command: &str) -> Result<RemoteOutput>;

    /// Interactive shell attached to the terminal
    async fn open_shell(&self, login: &SshLogin) -> Result<()>;

    async fn put_file(&self, login: &SshLogin, local: &Path, remote_dir: &str) -> Result<()>;

    async fn get_file(&self, login: &SshLogin, remote: &str, local_dir: &Path) -> Result<()>;

    fn set_refresh_callback(&self, callback: RefreshCallback);
}

/// `RemoteShell` on top of the OpenSSH client binaries
#[derive(Default)]
pub struct OpenSsh {
    refresh: Mutex<Option<RefreshCallback>>,
}

const SSH_OPTIONS: [&str; 4] = [
    "-o",
    "StrictHostKeyChecking=accept-new",
    "-o",
    "ConnectTimeout=10",
];

impl OpenSsh {
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh(&self) {
        let callback = self.refresh.lock().ok().and_then(|cb| cb.clone());
        if let Some(callback) = callback {
            callback();
        }
    }

    fn ssh(login: &SshLogin) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i").arg(&login.keyfile).args(SSH_OPTIONS);
        cmd
    }

    fn scp(login: &SshLogin) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-q").arg("-i").arg(&login.keyfile).args(SSH_OPTIONS);
        cmd
    }

    async fn run_scp(&self, login: &SshLogin, mut cmd: Command) -> Result<()> {
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .context("Failed to run scp")?;
        self.refresh();

        if !output.status.success() {
            return Err(anyhow!(
                "scp to {} failed: {}",
                login.node,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn run_command(&self, login: &SshLogin, command: &str) -> Result<RemoteOutput> {
        debug!(node = %login.node, host = %login.host, command = %command, "Running remote command");
        let output = Self::ssh(login)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(login.destination())
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run ssh for {}", login.node))?;
        self.refresh();

        Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        })
    }

    async fn open_shell(&self, login: &SshLogin) -> Result<()> {
        debug!(node = %login.node, host = %login.host, "Opening remote shell");
        let status = Self::ssh(login)
            .arg("-t")
            .arg(login.destination())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to run ssh for {}", login.node))?;
        self.refresh();

        if !status.success() {
            debug!(node = %login.node, status = ?status.code(), "Remote shell exited");
        }
        Ok(())
    }

    async fn put_file(&self, login: &SshLogin, local: &Path, remote_dir: &str) -> Result<()> {
        let mut cmd = Self::scp(login);
        cmd.arg(local)
            .arg(format!("{}:{}", login.destination(), remote_dir));
        self.run_scp(login, cmd).await
    }

    async fn get_file(&self, login: &SshLogin, remote: &str, local_dir: &Path) -> Result<()> {
        // One subdirectory per node so files with the same name do not collide
        let target = local_dir.join(&login.node);
        tokio::fs::create_dir_all(&target)
            .await
            .with_context(|| format!("Failed to create {}", target.display()))?;

        let mut cmd = Self::scp(login);
        cmd.arg(format!("{}:{}", login.destination(), remote))
            .arg(&target);
        self.run_scp(login, cmd).await
    }

    fn set_refresh_callback(&self, callback: RefreshCallback) {
        if let Ok(mut slot) = self.refresh.lock() {
            *slot = Some(callback);
        }
    }
}

/// Per-node outcome of a batch operation
pub type BatchResult<T> = Vec<(String, Result<T>)>;

fn logins(nodes: &[Node], keyfiles: &BTreeMap<String, PathBuf>) -> Vec<(String, Result<SshLogin>)> {
    nodes
        .iter()
        .map(|node| {
            let login = ssh_login(node, keyfiles).map_err(anyhow::Error::from);
            if let Err(e) = &login {
                warn!(node = %node.name, "{}", e);
            }
            (node.name.clone(), login)
        })
        .collect()
}

/// Run `command` on every node concurrently
pub async fn run_on_nodes(
    shell: &dyn RemoteShell,
    nodes: &[Node],
    keyfiles: &BTreeMap<String, PathBuf>,
    command: &str,
) -> BatchResult<RemoteOutput> {
    let tasks = logins(nodes, keyfiles).into_iter().map(|(name, login)| async move {
        let result = match login {
            Ok(login) => shell.run_command(&login, command).await,
            Err(e) => Err(e),
        };
        (name, result)
    });
    join_all(tasks).await
}

/// Copy local files to every node
pub async fn put_on_nodes(
    shell: &dyn RemoteShell,
    nodes: &[Node],
    keyfiles: &BTreeMap<String, PathBuf>,
    files: &[PathBuf],
    remote_dir: &str,
) -> BatchResult<()> {
    let tasks = logins(nodes, keyfiles).into_iter().map(|(name, login)| async move {
        let result = match login {
            Ok(login) => {
                let mut outcome = Ok(());
                for file in files {
                    if let Err(e) = shell.put_file(&login, file, remote_dir).await {
                        outcome = Err(e);
                        break;
                    }
                }
                outcome
            }
            Err(e) => Err(e),
        };
        (name, result)
    });
    join_all(tasks).await
}

/// Fetch a remote file from every node into `local_dir/<node>/`
pub async fn get_from_nodes(
    shell: &dyn RemoteShell,
    nodes: &[Node],
    keyfiles: &BTreeMap<String, PathBuf>,
    remote: &str,
    local_dir: &Path,
) -> BatchResult<()> {
    let tasks = logins(nodes, keyfiles).into_iter().map(|(name, login)| async move {
        let result = match login {
            Ok(login) => shell.get_file(&login, remote, local_dir).await,
            Err(e) => Err(e),
        };
        (name, result)
    });
    join_all(tasks).await
}
