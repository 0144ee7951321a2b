//! corrald: the Corral operator daemon.
//!
//! Opens the local state store and drives the control-plane facade:
//! - Address assignment (assign, remove, list)
//! - Desired-state scheduling (start, stop, pause, restart)
//! - Instance views with derived current state
//! - Service tree listing
//!
//! # Usage
//!
//! ```text
//! corrald --data-dir /var/lib/corral assign-ips web --ip 10.0.0.5
//! corrald start web --auto-launch
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use corral_core::CorralConfig;
use corral_facade::{Facade, LocalCoordinator};
use corral_state::StateStore;

use crate::commands::Command;

#[derive(Parser)]
#[command(name = "corrald", about = "Corral control-plane daemon")]
struct Cli {
    /// Path to corral.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory; overrides `store.path` from the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CorralConfig::from_file(path)?,
        None => CorralConfig::default(),
    };
    init_tracing(&config);

    // ── Open the store ─────────────────────────────────────────

    let db_path = match &cli.data_dir {
        Some(dir) => dir.join("corral.redb"),
        None => config.store_path(),
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Assemble the facade ────────────────────────────────────

    let coordinator = Arc::new(LocalCoordinator::new());
    let facade = Facade::new(store.clone(), coordinator, Arc::new(store)).with_config(&config);

    let output = commands::execute(&facade, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// `RUST_LOG` wins over the configured filter. Logs go to stderr so JSON
/// output on stdout stays parseable.
fn init_tracing(config: &CorralConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json() {
        builder.json().init();
    } else {
        builder.init();
    }
}
