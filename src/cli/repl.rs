// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::Result;
use console::style;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Editor, Helper};
use std::borrow::Cow;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::commands::{CommandLoader, Flow, Session, dispatch};
use crate::config;

/// Words completed before the command table has loaded
const SHELL_WORDS: &[&str] = &["exit", "help", "quit"];

struct FleetHelper {
    commands: Vec<String>,
}

impl FleetHelper {
    fn new(mut commands: Vec<String>) -> Self {
        commands.extend(SHELL_WORDS.iter().map(|w| w.to_string()));
        commands.sort();
        commands.dedup();
        Self { commands }
    }
}

impl Helper for FleetHelper {}

impl Hinter for FleetHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<Self::Hint> {
        None
    }
}

impl Validator for FleetHelper {
    fn validate(&self, _ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        Ok(ValidationResult::Valid(None))
    }
}

impl Completer for FleetHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];

        // Only the command word is completed
        if line_to_cursor.trim_start().contains(char::is_whitespace) {
            return Ok((pos, vec![]));
        }
        let word_start = line_to_cursor.len() - line_to_cursor.trim_start().len();
        let prefix = line_to_cursor[word_start..].to_lowercase();

        let matches = self
            .commands
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .map(|c| Pair {
                display: c.clone(),
                replacement: c.clone(),
            })
            .collect();

        Ok((word_start, matches))
    }
}

impl Highlighter for FleetHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let trimmed = line.trim_start();
        let word_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let word = &trimmed[..word_end];

        if self.commands.iter().any(|c| c == word) {
            let lead = line.len() - trimmed.len();
            Cow::Owned(format!(
                "{}\x1b[1;34m{}\x1b[0m{}",
                &line[..lead],
                word,
                &trimmed[word_end..]
            ))
        } else {
            Cow::Borrowed(line)
        }
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        _default: bool,
    ) -> Cow<'b, str> {
        Cow::Borrowed(prompt)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "{} {} - fleet operator shell",
        style("fleetsh").cyan().bold(),
        style(format!("v{}", version)).dim()
    );
    println!(
        "{}",
        style("Type 'help' for commands, 'filters' for targeting, Ctrl+D to exit").dim()
    );
    println!();
}

fn prompt(session: &Session) -> String {
    match session.engine.scope() {
        Some(scope) => format!(
            "{} {}> ",
            style("fleetsh").green().bold(),
            style(format!("[{}]", scope)).cyan()
        ),
        None => format!("{}> ", style("fleetsh").green().bold()),
    }
}

pub async fn run_repl(mut session: Session, mut loader: CommandLoader) -> Result<()> {
    let config = rustyline::Config::builder()
        .auto_add_history(true)
        .max_history_size(1000)?
        .build();

    let mut rl: Editor<FleetHelper, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(FleetHelper::new(Vec::new())));

    let history_path = config::history_path().ok();
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    session.shell.set_refresh_callback(Arc::new(|| {
        let _ = std::io::stdout().flush();
    }));

    print_welcome();
    let mut completion_loaded = false;

    loop {
        match rl.readline(&prompt(&session)) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let table = loader.table().await?;
                if !completion_loaded {
                    rl.set_helper(Some(FleetHelper::new(table.names())));
                    completion_loaded = true;
                }

                let start = Instant::now();
                match dispatch(input, &table, &mut session).await {
                    Ok(Flow::Exit) => {
                        println!("{}", style("Goodbye!").dim());
                        break;
                    }
                    Ok(Flow::Continue) => {
                        debug!(line = %input, elapsed_ms = start.elapsed().as_millis() as u64, "Command done");
                    }
                    Err(e) => {
                        debug!(line = %input, error = %format!("{:#}", e), "Command failed");
                        println!("{} {}", style("Error:").red().bold(), style(format!("{:#}", e)).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", style("^C").dim());
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}", style("Goodbye!").dim());
                break;
            }
            Err(err) => {
                println!("{} {:?}", style("Error:").red().bold(), err);
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = rl.save_history(path);
    }

    Ok(())
}

/// Run one command line without the interactive loop
pub async fn run_once(line: &str, mut session: Session, mut loader: CommandLoader) -> Result<()> {
    let table = loader.table().await?;
    dispatch(line, &table, &mut session).await?;
    Ok(())
}
