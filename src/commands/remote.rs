// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! atssh, put and get

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use super::{Command, Session, split_command};
use crate::fleet::login::ssh_login;
use crate::fleet::selector::Glob;
use crate::fleet::ssh::{self, BatchResult, RemoteOutput};

pub(super) fn commands() -> Vec<Arc<dyn Command>> {
    vec![Arc::new(AtSsh), Arc::new(Put), Arc::new(Get)]
}

/// Log per-node failures; returns how many nodes failed
fn report_failures<T>(results: &BatchResult<T>) -> usize {
    let mut failed = 0;
    for (node, result) in results {
        if let Err(e) = result {
            error!(node = %node, "{:#}", e);
            failed += 1;
        }
    }
    failed
}

fn print_output(results: &BatchResult<RemoteOutput>) {
    for (node, result) in results {
        let Ok(output) = result else { continue };
        let header = format!("[{}]", node);
        if output.success() {
            println!("{}", style(header).cyan().bold());
        } else {
            let status = output.status.map_or("signal".to_string(), |c| c.to_string());
            println!("{} {}", style(header).cyan().bold(), style(format!("exit {}", status)).red());
        }
        print!("{}", output.stdout);
        if !output.stderr.is_empty() {
            eprint!("{}", output.stderr);
        }
    }
}

struct AtSsh;

#[async_trait]
impl Command for AtSsh {
    fn name(&self) -> &'static str {
        "atssh"
    }

    fn usage(&self) -> &'static str {
        "atssh target [cmd] - run cmd over ssh, or open a shell on a single node"
    }

    fn help(&self) -> &'static str {
        "Shorthand:\n  @target cmd   run cmd on the running nodes matching target\n  \
         @ cmd         run cmd on every running node\n  \
         @nodename     open a shell on a single node\n\n\
         Examples:\n  @worker* sudo systemctl restart xyz\n  @ tail /etc/resolv.conf"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let (target, command) = split_command(args);
        if target.is_empty() {
            bail!("usage: {}", self.usage());
        }

        let nodes = session.running_nodes(target).await?;
        if nodes.is_empty() {
            return Ok(());
        }

        if command.is_empty() {
            if nodes.len() > 1 {
                info!(count = nodes.len(), "Raw shell is for single node targets only, see 'help atssh'");
                return Ok(());
            }
            let login = ssh_login(&nodes[0], &session.config.keyfiles)?;
            return session.shell.open_shell(&login).await;
        }

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        info!(command = %command, nodes = ?names, "Running over ssh");

        let results =
            ssh::run_on_nodes(session.shell.as_ref(), &nodes, &session.config.keyfiles, command).await;
        print_output(&results);
        if report_failures(&results) == 0 {
            session.ok();
        }
        Ok(())
    }
}

/// Files matching a local path whose last component may hold a glob
fn expand_local(pattern: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let file_pattern = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if !file_pattern.contains(['*', '?', '[']) {
        return Ok(if path.is_file() { vec![path.to_path_buf()] } else { Vec::new() });
    }

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let glob = Glob::new(file_pattern)?;

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| glob.matches(n))
        })
        .collect();
    files.sort();
    Ok(files)
}

struct Put;

#[async_trait]
impl Command for Put {
    fn name(&self) -> &'static str {
        "put"
    }

    fn usage(&self) -> &'static str {
        "put localfiles target [remotedir] - upload local files to nodes"
    }

    fn help(&self) -> &'static str {
        "localfiles may contain wildcards in the file name.\n\n\
         Examples:\n  put /opt/data/data1.txt worker*\n  put /opt/data/data*.txt 1,2 /opt/data"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let (local, target, remote_dir) = match parts.as_slice() {
            [local, target] => (*local, *target, ""),
            [local, target, dir] => (*local, *target, *dir),
            _ => bail!("usage: {}", self.usage()),
        };

        let files = expand_local(local)?;
        if files.is_empty() {
            bail!("local files not found: {}", local);
        }

        let nodes = session.running_nodes(target).await?;
        if nodes.is_empty() {
            return Ok(());
        }

        let results = ssh::put_on_nodes(
            session.shell.as_ref(),
            &nodes,
            &session.config.keyfiles,
            &files,
            remote_dir,
        )
        .await;
        if report_failures(&results) == 0 {
            session.ok();
        }
        Ok(())
    }
}

struct Get;

#[async_trait]
impl Command for Get {
    fn name(&self) -> &'static str {
        "get"
    }

    fn usage(&self) -> &'static str {
        "get target remotefile [localdir] - download a file from nodes into localdir/<node>/"
    }

    fn help(&self) -> &'static str {
        "remotefile cannot be a wildcard.\n\n\
         Examples:\n  get worker* /opt/output/data1.txt\n  get worker* /opt/output/data1.txt /tmp"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let (target, remote, local_dir) = match parts.as_slice() {
            [target, remote] => (*target, *remote, "."),
            [target, remote, dir] => (*target, *remote, *dir),
            _ => bail!("usage: {}", self.usage()),
        };

        let nodes = session.running_nodes(target).await?;
        if nodes.is_empty() {
            return Ok(());
        }

        let results = ssh::get_from_nodes(
            session.shell.as_ref(),
            &nodes,
            &session.config.keyfiles,
            remote,
            Path::new(local_dir),
        )
        .await;
        if report_failures(&results) == 0 {
            session.ok();
        }
        Ok(())
    }
}
