// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Shell commands
//!
//! Every command implements `Command` and is registered in a `CommandTable`.
//! The table is built on a background task at startup; `CommandLoader`
//! hands it out only once that task has finished, so dispatch never sees a
//! partially built table.

mod builtin;
mod nodes;
mod remote;
mod scope;
mod tag;

pub use builtin::print_help;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use console::style;
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::fleet::{Node, RemoteShell, TargetingEngine};
use crate::output::{NodeTable, Verbosity};
use crate::progress;

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line usage, shown by `help`
    fn usage(&self) -> &'static str;

    /// Longer description and examples, shown by `help <command>`
    fn help(&self) -> &'static str {
        ""
    }

    /// Run with everything after the command name, untokenized
    async fn run(&self, args: &str, session: &mut Session) -> Result<()>;
}

/// Command name to handler
pub struct CommandTable {
    commands: Vec<Arc<dyn Command>>,
    by_name: HashMap<&'static str, usize>,
}

impl CommandTable {
    pub fn new(commands: Vec<Arc<dyn Command>>) -> Self {
        let by_name = commands
            .iter()
            .enumerate()
            .map(|(idx, cmd)| (cmd.name(), idx))
            .collect();
        Self { commands, by_name }
    }

    /// Table with every command fleetsh ships
    pub fn builtin() -> Self {
        let start = std::time::Instant::now();
        let mut commands: Vec<Arc<dyn Command>> = Vec::new();
        commands.extend(nodes::commands());
        commands.extend(tag::commands());
        commands.extend(remote::commands());
        commands.extend(scope::commands());
        commands.extend(builtin::commands());

        let table = Self::new(commands);
        debug!(
            count = table.commands.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Command table built"
        );
        table
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.commands[idx]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Command>> {
        self.commands.iter()
    }

    /// Command names, sorted, for completion
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }
}

enum LoaderState {
    Loading(JoinHandle<CommandTable>),
    Ready(Arc<CommandTable>),
}

/// Gate in front of the command table while it is being built
pub struct CommandLoader {
    state: LoaderState,
}

impl CommandLoader {
    /// Start building the table on a blocking worker
    pub fn spawn() -> Self {
        Self {
            state: LoaderState::Loading(tokio::task::spawn_blocking(CommandTable::builtin)),
        }
    }

    /// The complete table, waiting for the loader on first use
    pub async fn table(&mut self) -> Result<Arc<CommandTable>> {
        if let LoaderState::Loading(handle) = &mut self.state {
            let table = handle.await.context("Command table loader failed")?;
            self.state = LoaderState::Ready(Arc::new(table));
        }
        match &self.state {
            LoaderState::Ready(table) => Ok(Arc::clone(table)),
            LoaderState::Loading(_) => Err(anyhow!("command table not loaded")),
        }
    }
}

/// Source of operator answers for confirmations and questions
pub trait Prompter: Send {
    /// One line of input without the trailing newline, None on end of input
    fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Reads answers from the terminal
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

/// Answers from a fixed script; end of input once the script runs out
#[cfg(test)]
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: std::collections::VecDeque<String>,
    pub prompts: Vec<String>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            prompts: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front()
    }
}

/// Ask a yes/no question until the answer is y or n; end of input is "n"
pub fn confirm(prompter: &mut dyn Prompter, question: &str) -> bool {
    let prompt = format!("{} [y/n]: ", question);
    loop {
        match prompter.read_line(&prompt) {
            None => return false,
            Some(answer) => match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => continue,
            },
        }
    }
}

/// Switches the log filter at runtime
pub type LogLevelSetter = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Everything a command can act on
pub struct Session {
    pub engine: TargetingEngine,
    pub shell: Arc<dyn RemoteShell>,
    pub config: Config,
    /// Where scope changes are persisted; None keeps them in memory
    pub config_path: Option<PathBuf>,
    /// Where `use filter` saves cluster documents
    pub clusters_dir: Option<PathBuf>,
    pub prompter: Box<dyn Prompter>,
    pub output: OutputFormat,
    /// Show spinners and styled output
    pub interactive: bool,
    pub log_level: Option<LogLevelSetter>,
}

impl Session {
    pub fn save_config(&self) -> Result<()> {
        match &self.config_path {
            Some(path) => self.config.save_to(path),
            None => Ok(()),
        }
    }

    /// Spinner shown while the next resolution lists the region
    fn fetch_spinner(&self) -> ProgressBar {
        match self.engine.scope() {
            Some(scope) if self.interactive && self.engine.needs_fetch() => {
                progress::create_spinner(&format!("Listing instances in {}...", scope.region))
            }
            _ => progress::hidden_spinner(),
        }
    }

    pub async fn resolve_targets(&mut self, target: &str, search: bool) -> Result<Vec<Node>> {
        let spinner = self.fetch_spinner();
        let result = self.engine.resolve_targets(target, search).await;
        spinner.finish_and_clear();
        Ok(result?)
    }

    pub async fn running_nodes(&mut self, target: &str) -> Result<Vec<Node>> {
        let spinner = self.fetch_spinner();
        let result = self.engine.running_nodes_from_target(target).await;
        spinner.finish_and_clear();
        Ok(result?)
    }

    pub async fn any_nodes(&mut self, target: &str) -> Result<Vec<Node>> {
        let spinner = self.fetch_spinner();
        let result = self.engine.any_nodes_from_target(target).await;
        spinner.finish_and_clear();
        Ok(result?)
    }

    pub fn print_nodes(&self, nodes: &[Node], verbosity: Verbosity) {
        println!("{}", NodeTable::from_nodes(nodes, verbosity).format(&self.output));
    }

    pub fn confirm(&mut self, question: &str) -> bool {
        confirm(self.prompter.as_mut(), question)
    }

    /// Operator-facing success line
    pub fn ok(&self) {
        info!("ok");
        if self.interactive {
            println!("{}", style("ok").green());
        }
    }
}

/// Split a line into the first word and the untouched rest
pub fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    }
}

/// Expand `@target cmd` to `atssh target cmd` and `@ cmd` to `atssh * cmd`
pub fn expand_shorthand(line: &str) -> String {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('@') else {
        return line.to_string();
    };
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        format!("atssh * {}", rest.trim_start()).trim_end().to_string()
    } else {
        format!("atssh {}", rest)
    }
}

/// What the loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Run one input line
///
/// `exit`/`quit` and `help` are handled here since they act on the loop and
/// the table themselves. Lines naming no known command go to the system
/// shell.
pub async fn dispatch(line: &str, table: &CommandTable, session: &mut Session) -> Result<Flow> {
    let line = expand_shorthand(line);
    let (name, args) = split_command(&line);

    match name {
        "" => Ok(Flow::Continue),
        "exit" | "quit" => Ok(Flow::Exit),
        "help" | "?" => {
            print_help(table, args);
            Ok(Flow::Continue)
        }
        _ => match table.get(name) {
            Some(command) => {
                debug!(command = %name, args = %args, "Dispatching");
                command.run(args, session).await?;
                Ok(Flow::Continue)
            }
            None => {
                run_system_shell(&line).await?;
                Ok(Flow::Continue)
            }
        },
    }
}

async fn run_system_shell(line: &str) -> Result<()> {
    info!(line = %line, "Unrecognized command, trying system shell");
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(line)
        .status()
        .await
        .context("Failed to run system shell")?;
    if !status.success() {
        debug!(status = ?status.code(), "System shell command failed");
    }
    Ok(())
}
