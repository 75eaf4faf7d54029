//! # elt-cli
//!
//! Command-line task runner for `elt-rs`. Loads a single task's `Config`
//! from a YAML or JSON file, plans it, and runs it to completion against
//! the registered drivers.
//!
//! ```bash
//! elt-cli --config task.yml
//! RUST_LOG=debug elt-cli --config task.yml
//! ```
//!
//! Only the drivers shipped in `elt-drivers` (a mock database and a local
//! filesystem) are registered; real warehouse/object-store drivers are an
//! out-of-scope collaborator (see `DriverRegistry`).

use anyhow::{Context, Result};
use clap::Parser;
use elt_core::{Config, DriverRegistry};
use elt_drivers::{LocalFilesystemDriver, MockDatabaseDriver};
use elt_engine::Executor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

/// Command-line arguments for the elt-rs task runner.
#[derive(Parser, Debug)]
#[command(name = "elt-cli")]
#[command(about = "Runs a single elt-rs task from a config file")]
struct Args {
    /// Path to the task's YAML or JSON configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

fn build_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register_database("mock_db", Arc::new(MockDatabaseDriver::new()));
    let fs = Arc::new(LocalFilesystemDriver::new());
    registry.register_filesystem("local", fs.clone());
    registry.register_filesystem("file", fs);
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    elt_core::telemetry::init();

    let args = Args::parse();
    let config = Config::load_file(&args.config)
        .context("loading task config")?
        .prepare()
        .context("preparing task config")?;

    let registry = build_registry();
    let max_identifier_len = 63;
    let mut task = elt_engine::planner::plan(config, max_identifier_len).context("planning task")?;

    let executor = Executor::new(registry);
    let cancel = task.cancel.clone();

    // The cancellation itself is just a signal; `Executor::run` is the one
    // that races it against the in-flight work and gives it the grace
    // period (§5), so Task.status lands on Error/Interrupted either way.
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl-C, cancelling task");
            cancel.cancel();
        }
    });

    let outcome = executor.run(&mut task).await.context("running task")?;
    tracing::info!(?outcome, topology = %task.topology, "task finished");
    Ok(())
}
