// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fleet;
mod output;
pub mod progress;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, reload};

use cli::Args;
use commands::{CommandLoader, LogLevelSetter, Session, StdinPrompter};
use config::Config;
use fleet::cluster::{clusters_dir, load_cluster_specs};
use fleet::{InventoryFileProvider, OpenSsh, TargetingEngine};

/// Initialize logging with file output and operator messages on stderr
///
/// Returns a setter for the `loglevel` command, or None when logging could
/// not be set up.
fn init_logging(verbose: bool) -> Option<LogLevelSetter> {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return None;
    }

    // 10MB per file, 5 files kept, also rotated daily
    let log_path = log_dir.join("fleetsh.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return None;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "fleetsh=debug" } else { "fleetsh=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let (filter_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(env_filter);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_span_events(FmtSpan::NONE);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Some(Box::new(move |level: &str| {
        handle
            .reload(EnvFilter::new(format!("fleetsh={}", level)))
            .context("Failed to change log level")
    }))
}

/// Initial scope: command line first, then the saved config
fn restore_scope(engine: &mut TargetingEngine, args: &Args, config: &Config) -> Result<()> {
    if let Some(cluster) = &args.cluster {
        engine.use_cluster(cluster)?;
        return Ok(());
    }
    if let Some(region) = &args.region {
        engine.use_region(region);
        return Ok(());
    }

    if let Some(cluster) = &config.cluster {
        match engine.use_cluster(cluster) {
            Ok(()) => return Ok(()),
            Err(e) => warn!("Could not restore saved cluster: {}", e),
        }
    }
    if let Some(region) = &config.region {
        engine.use_region(region);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = init_logging(args.verbose);

    // Built in the background while config and cluster documents load
    let loader = CommandLoader::spawn();

    let config_path = Config::config_path()?;
    let config = Config::load_from(&config_path).unwrap_or_else(|e| {
        warn!("Could not load config, using defaults: {:#}", e);
        Config::default()
    });

    let clusters_dir = clusters_dir()?;
    let clusters = load_cluster_specs(&clusters_dir)?;
    debug!(count = clusters.len(), dir = %clusters_dir.display(), "Cluster documents loaded");

    let inventory = match &args.inventory {
        Some(path) => path.clone(),
        None => InventoryFileProvider::default_path()?,
    };
    let provider = Arc::new(InventoryFileProvider::open(&inventory)?);

    let mut engine = TargetingEngine::new(provider, config.login_rules.clone(), clusters);
    restore_scope(&mut engine, &args, &config)?;

    let command_line = args.command_line();
    let session = Session {
        engine,
        shell: Arc::new(OpenSsh::new()),
        config,
        config_path: Some(config_path),
        clusters_dir: Some(clusters_dir),
        prompter: Box::new(StdinPrompter),
        output: args.output.clone(),
        interactive: command_line.is_none(),
        log_level,
    };

    match command_line {
        Some(line) => {
            if let Err(e) = cli::repl::run_once(&line, session, loader).await {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
            Ok(())
        }
        None => cli::repl::run_repl(session, loader).await,
    }
}
