// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batchkeeper - resumable batch runner
//!
//! Runs a registered producer through the in-process worker pool and keeps a
//! checkpoint file next to it, so an interrupted run continues where it
//! stopped.
//!
//! Usage:
//!   batchkeeper run <target> [options]
//!   batchkeeper status <target> [--state-file <path>]
//!   batchkeeper reset <target> [--state-file <path>]
//!
//! Configuration is read from `BATCHKEEPER_*` environment variables (and a
//! `.env` file if present); command-line flags take precedence.

mod builtin;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use batchkeeper_core::{Controller, ControllerConfig, LocalBackend, LocalBackendConfig, RunSummary};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::builtin::EchoHandler;

#[derive(Debug, Parser)]
#[command(name = "batchkeeper")]
#[command(about = "Run batch jobs with checkpointed resume")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a producer to completion, resuming from its checkpoint
    Run(RunArgs),
    /// Print the persisted checkpoint as JSON
    Status(TargetArgs),
    /// Delete the checkpoint so the next run starts over
    Reset(TargetArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Producer locator, e.g. builtin.range:numbers
    target: String,

    /// Checkpoint file (default: <state dir>/<component>.state)
    #[arg(long, env = "BATCHKEEPER_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Number of items produced by builtin.range:numbers
    #[arg(long, env = "BATCHKEEPER_RANGE_END", default_value_t = 100)]
    range_end: u64,

    /// Input file for builtin.lines:file
    #[arg(long, env = "BATCHKEEPER_INPUT")]
    input: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Number of worker tasks
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Job queue capacity
    #[arg(long, default_value_t = 64)]
    queue: usize,

    /// Time each job takes in the built-in handler, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Disable progress logging
    #[arg(long)]
    no_progress: bool,

    /// Clear the checkpoint before running
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batchkeeper=info,batchkeeper_core=info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => {
            let summary = run(args).await?;
            info!(
                dispatched = summary.dispatched,
                first_job_id = ?summary.first_job_id,
                last_job_id = ?summary.last_job_id,
                "Batch finished"
            );
        }
        Command::Status(args) => {
            let config = ControllerConfig::from_env()?;
            let ctl = controller(&args, config, LocalBackendConfig::default(), 0).await?;
            let checkpoint = ctl.status().await;
            let status = json!({
                "state_file": ctl.state_file().display().to_string(),
                "job_id": checkpoint.job_id,
                "job": checkpoint.job,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Reset(args) => {
            let config = ControllerConfig::from_env()?;
            let ctl = controller(&args, config, LocalBackendConfig::default(), 0).await?;
            ctl.reset().await?;
            println!("Cleared {}", ctl.state_file().display());
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<RunSummary> {
    let mut config = ControllerConfig::from_env()?;
    if args.no_progress {
        config = config.with_progress(false);
    }

    let backend_config = LocalBackendConfig {
        workers: args.workers,
        queue_capacity: args.queue,
    };
    let controller = controller(&args.target, config, backend_config, args.delay_ms).await?;

    if args.reset {
        warn!(state_file = %controller.state_file().display(), "Resetting checkpoint before run");
        controller.reset().await?;
    }

    controller
        .run()
        .await
        .with_context(|| format!("run of {} failed", args.target.target))
}

/// Build a controller for `args.target` over a local backend running the
/// echo handler.
async fn controller(
    args: &TargetArgs,
    config: ControllerConfig,
    backend_config: LocalBackendConfig,
    delay_ms: u64,
) -> anyhow::Result<Controller<Value>> {
    let registry = builtin::registry(args.range_end, args.input.as_deref()).await?;
    let handler = Arc::new(EchoHandler::new(Duration::from_millis(delay_ms)));
    let backend = Arc::new(LocalBackend::<Value>::new(handler, backend_config));

    let mut builder = Controller::<Value>::builder()
        .backend(backend)
        .target(args.target.as_str())
        .registry(registry)
        .config(config);
    if let Some(path) = &args.state_file {
        builder = builder.state_file(path);
    }

    builder
        .build()
        .with_context(|| format!("cannot resolve target {}", args.target))
}
