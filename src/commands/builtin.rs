// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! help, filters and loglevel

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use console::Style;
use std::sync::Arc;

use super::{Command, CommandTable, Session};
use crate::fleet::Attribute;

pub(super) fn commands() -> Vec<Arc<dyn Command>> {
    vec![Arc::new(Filters), Arc::new(LogLevel)]
}

/// `help` lists every command, `help <command>` shows one in detail
pub fn print_help(table: &CommandTable, topic: &str) {
    let help_style = Style::new().cyan();
    let cmd_style = Style::new().yellow();
    let topic = topic.trim();

    if !topic.is_empty() {
        match table.get(topic) {
            Some(command) => {
                println!("{}", cmd_style.apply_to(command.usage()));
                if !command.help().is_empty() {
                    println!();
                    println!("{}", command.help());
                }
            }
            None => println!("No help for '{}'", topic),
        }
        println!();
        return;
    }

    println!("{}", help_style.apply_to("Commands:"));
    for command in table.iter() {
        println!("  {}", cmd_style.apply_to(command.usage()));
    }
    println!();
    println!("{}", help_style.apply_to("Shell:"));
    println!("  {} - run cmd on target nodes over ssh", cmd_style.apply_to("@target cmd"));
    println!("  {} - show help for a command", cmd_style.apply_to("help <command>"));
    println!("  {} - exit (also Ctrl+D)", cmd_style.apply_to("exit | quit"));
    println!("  Anything else is passed to the system shell.");
    println!();
}

struct Filters;

#[async_trait]
impl Command for Filters {
    fn name(&self) -> &'static str {
        "filters"
    }

    fn usage(&self) -> &'static str {
        "filters - help on target filter expressions"
    }

    async fn run(&self, _args: &str, _session: &mut Session) -> Result<()> {
        let help_style = Style::new().cyan();
        let cmd_style = Style::new().yellow();

        println!("{}", help_style.apply_to("Filter expressions:"));
        println!("  {}  - all nodes in the current scope", cmd_style.apply_to("* or empty"));
        println!("  {}  - display indexes from 'show'", cmd_style.apply_to("1,3,4"));
        println!("  {}  - all nodes of a cluster", cmd_style.apply_to("<cluster>"));
        println!("  {}  - node name glob (*, ?, [...])", cmd_style.apply_to("worker*"));
        println!("  {}  - attribute glob", cmd_style.apply_to("state=run*"));
        println!("  {}  - tag glob, quote keys containing ':'", cmd_style.apply_to("tags=env:prod"));
        println!("  Terms separated by ',' are combined with OR. Matching is case-insensitive.");
        println!("  'show' falls back to a free-text search when no term matches.");
        println!();

        let mut names: Vec<&str> = Attribute::ALL.iter().map(|a| a.name()).collect();
        names.sort_unstable();
        println!("{}", help_style.apply_to("Attributes:"));
        println!("  {}", names.join(", "));
        println!("  Short forms: ip, type, vpc, subnet, key, dns, sg, user");
        println!();
        Ok(())
    }
}

struct LogLevel;

#[async_trait]
impl Command for LogLevel {
    fn name(&self) -> &'static str {
        "loglevel"
    }

    fn usage(&self) -> &'static str {
        "loglevel info|debug - change the log level"
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let level = args.trim().to_ascii_lowercase();
        if !matches!(level.as_str(), "info" | "debug") {
            bail!("usage: {}", self.usage());
        }
        let setter = session
            .log_level
            .as_ref()
            .ok_or_else(|| anyhow!("log level cannot be changed in this session"))?;
        setter(&level)?;
        println!("Log level set to {}", level);
        Ok(())
    }
}
