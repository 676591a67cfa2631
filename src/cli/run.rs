use super::{load, open_storage, CliError};
use crate::config::Config;
use crate::export::scheduler::{tick, Scheduler};
use crate::export::{ExportPorts, HttpShipper, RunCoordinator, RunOptions, RunOutcome, ShipError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Cli(#[from] CliError),

    #[error("shipper error: {0}")]
    Shipper(#[from] ShipError),

    #[error("export run failed, see log")]
    RunFailed,

    #[error("export run interrupted")]
    Interrupted,
}

async fn build_coordinator(config: &Config) -> Result<RunCoordinator, RunError> {
    let storage = open_storage(config).await?;
    let shipper = Arc::new(HttpShipper::new(config.shipper.timeout)?);
    let options = RunOptions::from(config);
    info!(
        batch_size = options.batch_size,
        max_batches_per_run = options.max_batches_per_run,
        lock_ttl = ?options.lock_ttl,
        "Export job configured"
    );
    Ok(RunCoordinator::new(
        ExportPorts::shared(storage),
        shipper,
        options,
    ))
}

/// Runs the export on its interval until Ctrl+C.
pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref()).map_err(RunError::from)?;
    let coordinator = Arc::new(build_coordinator(&config).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(coordinator, config.export.interval);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!("Export scheduler running, press Ctrl+C to shutdown");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    match scheduler_handle.await {
        Ok(runs) => info!(runs, "Shutdown complete"),
        Err(e) => error!(error = %e, "Scheduler task join error"),
    }

    Ok(())
}

/// Performs a single export run and exits.
pub async fn once(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref()).map_err(RunError::from)?;
    let coordinator = build_coordinator(&config).await?;

    let finished = tokio::select! {
        report = tick(&coordinator) => Some(report),
        _ = signal::ctrl_c() => None,
    };
    let Some(report) = finished else {
        info!("Interrupted, releasing export lock");
        coordinator.finish_pending_releases().await;
        return Err(RunError::Interrupted.into());
    };
    let report = report.ok_or(RunError::RunFailed)?;
    match report.outcome {
        RunOutcome::Done | RunOutcome::Partial(_) => println!(
            "Sent {} records in {} batches (cursor {} -> {})",
            report.records_sent, report.batches_sent, report.cursor_before, report.cursor_after
        ),
        RunOutcome::Skipped => println!("Another export run is in progress, skipped"),
        RunOutcome::Unconfigured => {
            println!("No endpoint configured. Set one with: log-sender settings set endpoint_url <url>")
        }
    }

    Ok(())
}
