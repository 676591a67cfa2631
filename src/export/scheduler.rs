use super::coordinator::{RunCoordinator, RunOutcome, RunReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Invokes the coordinator on a fixed interval until shutdown.
///
/// The first run starts immediately. A run that overlaps the next tick delays
/// it instead of queueing extra runs.
pub struct Scheduler {
    coordinator: Arc<RunCoordinator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(coordinator: Arc<RunCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Returns the number of runs that were started.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Export scheduler started");
        let mut runs = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    runs += 1;
                    tick(&self.coordinator).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(runs, "Export scheduler stopped");
        runs
    }
}

/// One trigger: run and log the outcome. Errors stay inside the run.
pub async fn tick(coordinator: &RunCoordinator) -> Option<RunReport> {
    match coordinator.run_once().await {
        Ok(report) => {
            log_report(&report);
            Some(report)
        }
        Err(e) => {
            error!(error = %e, "Export run failed");
            None
        }
    }
}

fn log_report(report: &RunReport) {
    match report.outcome {
        RunOutcome::Skipped | RunOutcome::Unconfigured => {
            debug!(outcome = ?report.outcome, "Export run did nothing");
        }
        _ => info!(
            outcome = ?report.outcome,
            batches = report.batches_sent,
            records = report.records_sent,
            cursor_before = report.cursor_before,
            cursor_after = report.cursor_after,
            "Export run finished"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::coordinator::{ExportPorts, RunOptions};
    use crate::export::shipper::{BatchShipper, ShipReceipt};
    use crate::record::EnrichedLogRecord;
    use crate::storage::duckdb::DuckDbStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingShipper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchShipper for CountingShipper {
        async fn send(
            &self,
            _endpoint: &str,
            _records: &[EnrichedLogRecord],
        ) -> crate::export::shipper::Result<ShipReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ShipReceipt {
                status: 200,
                bytes: 0,
                digest: String::new(),
            })
        }
    }

    async fn coordinator() -> Arc<RunCoordinator> {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        let storage = Arc::new(storage);
        Arc::new(RunCoordinator::new(
            ExportPorts::shared(storage),
            Arc::new(CountingShipper::default()),
            RunOptions::default(),
        ))
    }

    #[tokio::test]
    async fn test_scheduler_runs_until_shutdown() {
        let coordinator = coordinator().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = Scheduler::new(coordinator, Duration::from_millis(50));
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(180)).await;
        shutdown_tx.send(true).unwrap();

        let runs = handle.await.unwrap();
        assert!(runs >= 2, "expected several runs, got {}", runs);
    }

    #[tokio::test]
    async fn test_tick_reports_unconfigured_run() {
        let coordinator = coordinator().await;
        let report = tick(&coordinator).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Unconfigured);
    }
}
