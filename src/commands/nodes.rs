// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! show, refresh and the lifecycle commands

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Command, Session};
use crate::fleet::ops;
use crate::fleet::{Node, Operation};
use crate::output::Verbosity;

pub(super) fn commands() -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(Show),
        Arc::new(Refresh),
        Arc::new(Lifecycle(Operation::Start)),
        Arc::new(Lifecycle(Operation::Stop)),
        Arc::new(Lifecycle(Operation::Terminate)),
    ]
}

/// Split leading `-v`/`-vv` flags from the target expression
fn parse_show_args(args: &str) -> (Verbosity, &str) {
    let mut level = 0;
    let mut rest = args.trim();
    while let Some(flag) = rest.split_whitespace().next() {
        if flag.len() > 1 && flag.starts_with('-') && flag[1..].chars().all(|c| c == 'v') {
            level += flag.len() - 1;
            rest = rest[flag.len()..].trim_start();
        } else {
            break;
        }
    }
    (Verbosity::from_level(level), rest)
}

async fn show(args: &str, session: &mut Session) -> Result<()> {
    let (verbosity, target) = parse_show_args(args);
    let nodes = session.resolve_targets(target, true).await?;

    if nodes.is_empty() {
        info!(target = %target, "no nodes matched");
        return Ok(());
    }
    session.print_nodes(&nodes, verbosity);

    if let Some(age) = session.engine.inventory_age() {
        debug!(age_secs = age.as_secs(), "Inventory age");
    }

    let absent = session.engine.absent_count();
    if absent > 0 {
        info!(absent, "Configured nodes without an instance, 'start' launches them");
    }
    Ok(())
}

struct Show;

#[async_trait]
impl Command for Show {
    fn name(&self) -> &'static str {
        "show"
    }

    fn usage(&self) -> &'static str {
        "show [-v|-vv] [filter] - show all nodes or filtered nodes"
    }

    fn help(&self) -> &'static str {
        "Free-text search over tags and attributes is used when no filter term matches.\n\n\
         Examples:\n  show\n  show worker*\n  show -v state=running\n  show -vv ip=52.51*"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        show(args, session).await
    }
}

struct Refresh;

#[async_trait]
impl Command for Refresh {
    fn name(&self) -> &'static str {
        "refresh"
    }

    fn usage(&self) -> &'static str {
        "refresh [-v|-vv] [filter] - list the region again, then show"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        session.engine.invalidate();
        show(args, session).await
    }
}

/// start, stop or terminate
struct Lifecycle(Operation);

#[async_trait]
impl Command for Lifecycle {
    fn name(&self) -> &'static str {
        self.0.as_str()
    }

    fn usage(&self) -> &'static str {
        match self.0 {
            Operation::Start => "start [filter] - start stopped nodes, launch absent cluster nodes",
            Operation::Stop => "stop [filter] - stop running nodes",
            Operation::Terminate => "terminate [filter] - terminate nodes",
        }
    }

    fn help(&self) -> &'static str {
        match self.0 {
            Operation::Start => "Examples:\n  start worker*\n  start 2,3",
            Operation::Stop => "Asks for confirmation.\n\nExamples:\n  stop worker*\n  stop *",
            Operation::Terminate => "Asks for confirmation.\n\nExamples:\n  terminate 4",
        }
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let target = args.trim();
        let nodes = session.any_nodes(target).await?;
        if nodes.is_empty() {
            return Ok(());
        }

        let plan = ops::plan(self.0, &nodes, session.config.default_key.as_deref());
        if plan.is_empty() {
            for skipped in &plan.skipped {
                info!(node = %skipped.node, "{}: {}", self.0, skipped.reason);
            }
            info!(operation = %self.0, "Nothing to do");
            return Ok(());
        }

        if self.0.is_destructive() {
            let affected: Vec<Node> = nodes
                .into_iter()
                .filter(|n| plan.ids.iter().any(|id| id == n.id()))
                .collect();
            session.print_nodes(&affected, Verbosity::Normal);
            if !session.confirm(&format!("{} {} node(s). Continue", self.0, affected.len())) {
                info!(operation = %self.0, "Cancelled");
                return Ok(());
            }
        }

        let launched = session.engine.apply(&plan).await?;
        for id in &launched {
            println!("launched {}", id);
        }
        session.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{provider, session};
    use crate::fleet::testing::{Call, MockShell};

    #[test]
    fn test_parse_show_args() {
        assert_eq!(parse_show_args(""), (Verbosity::Normal, ""));
        assert_eq!(parse_show_args("worker*"), (Verbosity::Normal, "worker*"));
        assert_eq!(parse_show_args("-v worker*"), (Verbosity::Detailed, "worker*"));
        assert_eq!(parse_show_args("-vv"), (Verbosity::Full, ""));
        assert_eq!(parse_show_args("-v -v 1,2"), (Verbosity::Full, "1,2"));
        assert_eq!(parse_show_args("-x"), (Verbosity::Normal, "-x"));
    }

    #[tokio::test]
    async fn test_show_and_refresh() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &[]);

        Show.run("-v worker*", &mut session).await.unwrap();
        Show.run("", &mut session).await.unwrap();
        assert_eq!(provider.list_calls(), 1);

        Refresh.run("", &mut session).await.unwrap();
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_stop_requires_confirmation() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &["n"]);

        Lifecycle(Operation::Stop).run("worker*", &mut session).await.unwrap();
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_confirmed() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &["huh", "y"]);

        Lifecycle(Operation::Stop).run("worker*", &mut session).await.unwrap();
        // worker1 is already stopped
        assert_eq!(provider.calls(), vec![Call::Stop(vec!["i-3".to_string()])]);
        assert!(session.engine.needs_fetch());
    }

    #[tokio::test]
    async fn test_start_needs_no_confirmation() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &[]);

        Lifecycle(Operation::Start).run("*", &mut session).await.unwrap();
        assert_eq!(provider.calls(), vec![Call::Start(vec!["i-2".to_string()])]);
    }

    #[tokio::test]
    async fn test_stop_noop_makes_no_call() {
        let provider = provider();
        let shell = Arc::new(MockShell::default());
        let mut session = session(&provider, &shell, &["y"]);

        Lifecycle(Operation::Stop).run("worker1", &mut session).await.unwrap();
        assert!(provider.calls().is_empty());
        assert!(!session.engine.needs_fetch());
    }
}
