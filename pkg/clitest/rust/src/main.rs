// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_clitest::{Config, Harness, RenderError, RenderOptions, load_config};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal::unix::{SignalKind, signal};

/// Render a command the way a test would and report whether it became ready.
#[derive(Debug, Parser)]
#[command(name = "dd-clitest", version)]
struct Args {
    /// Working directory for the command.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// YAML configuration file (defaults to $DD_CLITEST_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    error_debounce_ms: Option<u64>,

    #[arg(long)]
    ready_timeout_ms: Option<u64>,

    /// Mirror the command's stdout while it runs.
    #[arg(long)]
    debug: bool,

    /// After readiness, wait for the command to exit instead of killing it.
    #[arg(long)]
    wait: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(required = true, last = true)]
    command: Vec<String>,
}

fn load(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::from_env()?,
    };
    if let Some(ms) = args.error_debounce_ms {
        config.error_debounce_timeout_ms = ms;
    }
    if let Some(ms) = args.ready_timeout_ms {
        config.ready_timeout_ms = Some(ms);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    simple_logger::init_with_level(level)?;

    let harness = Harness::new(load(&args).context("loading configuration")?);
    let (command, rest) = args
        .command
        .split_first()
        .context("no command given")?;

    let mut options = RenderOptions::default().debug(args.debug);
    if let Some(cwd) = &args.cwd {
        options = options.cwd(cwd);
    }

    let code = match harness.render(command, rest.iter().cloned(), options).await {
        Ok(instance) => {
            info!("[{}] ready (pid={})", instance.id(), instance.pid().unwrap_or(0));
            if args.wait {
                let mut sigint = signal(SignalKind::interrupt())?;
                tokio::select! {
                    exit = instance.wait_for_exit() => {
                        if let Some(exit) = exit {
                            info!("[{}] exited with code {}", instance.id(), exit.exit_code);
                        }
                    }
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            println!("{}", instance.text());
            ExitCode::SUCCESS
        }
        Err(RenderError::NotReady { reason, .. }) => {
            error!("{command} failed before becoming ready");
            eprintln!("{reason}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    };

    if let Err(e) = harness.cleanup().await {
        error!("{e}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(code)
}
