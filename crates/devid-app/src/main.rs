// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// devid: device identity store
//
// Entry point.  Initialises logging, resolves the data directory and
// configuration, then runs one identity command.  Results go to stdout,
// logs to stderr.

mod services;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use devid_bridge::HostFingerprint;
use devid_core::error::Result;
use devid_service::TransferBundle;
use tracing::{error, info, warn};

use services::app_services::{self, AppServices};
use services::data_dir;

/// Stable, anonymised device identity backed by an encrypted local store.
#[derive(Parser, Debug)]
#[command(name = "devid")]
#[command(version, about, long_about = None)]
struct Args {
    /// Data directory holding the store, audit log and config.json
    #[arg(short, long, env = "DEVID_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Screen resolution reported in the fingerprint (<width>x<height>)
    #[arg(long, env = "DEVID_SCREEN_RESOLUTION")]
    screen_resolution: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the device hash, generating one on first use (default)
    Hash,
    /// Decrypt this device's stored fingerprint for a hash
    Decrypt { hash: String },
    /// Write a cross-device transfer bundle for a hash as JSON
    Export { hash: String },
    /// Open a transfer bundle produced by `export` ("-" reads stdin)
    Import { bundle: PathBuf },
    /// Remove records older than the maximum age
    Evict {
        /// Override the configured maximum age, in milliseconds
        #[arg(long)]
        max_age_ms: Option<i64>,
    },
    /// Show recent audit entries, newest first
    Audit {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to config.json in the data directory
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Hash);

    let services = match build_services(args.data_dir.as_deref(), args.screen_resolution, &command) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialise services");
            return degrade(&command);
        }
    };

    match run(&services, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), error = %e, "command failed");
            eprintln!("devid: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_services(
    explicit_dir: Option<&Path>,
    screen_resolution: Option<String>,
    command: &Command,
) -> Result<AppServices> {
    let dir = data_dir::data_dir(explicit_dir)?;
    let mut config = app_services::load_config(&dir);
    if let Command::Evict {
        max_age_ms: Some(max_age_ms),
    } = command
    {
        config.max_age_ms = *max_age_ms;
    }

    let mut host = HostFingerprint::default();
    if let Some(resolution) = screen_resolution {
        host = host.with_screen_resolution(resolution);
    }
    AppServices::init(dir, config, Arc::new(host))
}

/// The hash command never fails: without an identity it says so and exits
/// cleanly.  Other commands report the failure.
fn degrade(command: &Command) -> ExitCode {
    if matches!(command, Command::Hash) {
        println!("no identity available");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(services: &AppServices, command: Command) -> Result<()> {
    let identity = services.identity();
    match command {
        Command::Hash => match identity.get_or_create_hash().await {
            Ok(hash) => println!("{hash}"),
            Err(e) => {
                warn!(code = e.code(), error = %e, "no identity available");
                println!("no identity available");
            }
        },
        Command::Decrypt { hash } => {
            println!("{}", identity.decrypt_own_hash(&hash).await?);
        }
        Command::Export { hash } => {
            let bundle = identity.export_for_transfer(&hash).await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Command::Import { bundle } => {
            let json = if bundle.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&bundle)?
            };
            let bundle: TransferBundle = serde_json::from_str(&json)?;
            let fingerprint = identity
                .decrypt_cross_device_hash(&bundle.blob, &bundle.key)
                .await?;
            println!("{fingerprint}");
        }
        Command::Evict { .. } => {
            let removed = identity.evict_stale().await?;
            info!(removed, "eviction complete");
            println!("{removed}");
        }
        Command::Audit { limit } => {
            for entry in services.recent_audit(limit)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::Config { write } => {
            if write {
                app_services::persist_config(services.data_dir(), services.config())?;
                info!(path = %services.data_dir().display(), "configuration written");
            }
            println!("{}", serde_json::to_string_pretty(services.config())?);
        }
    }
    Ok(())
}
