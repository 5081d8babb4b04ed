//! Warden Keeper - triggers scheduled transfers when their windows open
//!
//! Opens the shared ledger snapshot and polls it for due jobs. Every
//! execution is written back to the snapshot under its file lock, so the
//! CLI and other keepers may use the same file concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_chain::MemoryLedger;
use warden_core::{Warden, WardenConfig};
use warden_keeper::Keeper;
use warden_spec::{Clock, SystemClock};

/// CLI arguments
#[derive(Parser)]
#[command(name = "warden-keeper")]
#[command(about = "Executes due scheduled transfers")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "warden.json")]
    config: PathBuf,

    /// Ledger snapshot, overriding the configured path
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Name used in log lines
    #[arg(long, default_value = "keeper")]
    name: String,

    /// Poll interval in milliseconds, overriding the configured one
    #[arg(long)]
    poll_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = WardenConfig::load(&args.config)?;
    let ledger_path = args.ledger.unwrap_or_else(|| config.ledger_state.clone());
    let poll_interval = Duration::from_millis(args.poll_ms.unwrap_or(config.poll_interval_ms));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = MemoryLedger::open(&ledger_path, config.crypto(), clock.clone())
        .with_context(|| format!("opening ledger {}", ledger_path.display()))?;
    let warden = Warden::new(config, Arc::new(ledger), clock);

    info!("Starting Warden Keeper on {}", ledger_path.display());

    let keeper = Keeper::new(
        args.name,
        warden.ledger().clone(),
        warden.jobs.clone(),
        poll_interval,
    );
    let cancel = CancellationToken::new();
    let (receipt_tx, mut receipt_rx) = mpsc::unbounded_channel();

    let keeper_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { keeper.run(cancel, receipt_tx).await })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            cancel.cancel();
        });
    }

    while let Some(receipt) = receipt_rx.recv().await {
        info!(
            "Job {} execution {} in block {} ({:?})",
            receipt.job_id, receipt.execution_index, receipt.block_number, receipt.tx_hash
        );
    }

    keeper_task.await??;
    info!("Keeper stopped");
    Ok(())
}
