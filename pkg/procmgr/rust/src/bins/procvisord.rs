// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use procvisor::Supervisor;
use procvisor::config::DEFAULT_CONFIG_DIR;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

/// Supervise the programs described in a configuration directory.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Directory holding one `<program>.yaml` file per program.
    #[arg(long, env = "PROCVISOR_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG takes precedence over --log-level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_dir = %args.config_dir.display(),
        "procvisord starting"
    );

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;

    let supervisor = Supervisor::new(args.config_dir);
    if let Err(e) = supervisor.load().await {
        error!("initial load failed: {e:#}");
    }

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");
                match supervisor.reload().await {
                    Ok(report) => info!(
                        added_groups = ?report.added_groups,
                        changed_groups = ?report.changed_groups,
                        removed_groups = ?report.removed_groups,
                        "reload complete"
                    ),
                    Err(e) => warn!("reload failed, keeping current programs: {e:#}"),
                }
            }
            _ = sigusr1.recv() => {
                match serde_yaml::to_string(&supervisor.process_infos()) {
                    Ok(dump) => info!("process status:\n{dump}"),
                    Err(e) => warn!(error = %e, "failed to render process status"),
                }
            }
        }
    }

    supervisor.shutdown().await;
    info!("procvisord stopped");
    Ok(())
}
