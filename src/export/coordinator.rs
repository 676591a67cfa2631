use super::enricher::Enricher;
use super::fetcher::LogFetcher;
use super::settings::ExportSettings;
use super::shipper::BatchShipper;
use crate::config::types::Config;
use crate::storage::cursor::{CursorError, CursorStore};
use crate::storage::lock::{acquire_with_wait, LockGuard, PendingReleases};
use crate::storage::traits::{EventStore, JobLock, ReferenceStore, SettingsStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Lock resource guarding the export job.
pub const LOCK_RESOURCE: &str = "send_log_lock";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to read settings: {0}")]
    Settings(StorageError),

    #[error("failed to resolve allowed targets: {0}")]
    Targets(StorageError),

    #[error("failed to fetch logs after id {after}: {source}")]
    Fetch { after: i64, source: StorageError },

    #[error("failed to enrich batch starting at id {first_id}: {source}")]
    Enrich { first_id: i64, source: StorageError },

    #[error("failed to read cursor: {0}")]
    Cursor(CursorError),

    #[error("batch up to id {last_id} was delivered but the cursor could not be saved: {source}")]
    Persistence { last_id: i64, source: CursorError },

    #[error("lock error: {0}")]
    Lock(StorageError),
}

/// Why a run stopped before draining the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DeliveryFailed,
    BatchCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing left to send
    Done,
    /// Another run holds the lock
    Skipped,
    /// Stopped early, the next run resumes from the saved cursor
    Partial(StopReason),
    /// No endpoint configured
    Unconfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub batches_sent: usize,
    pub records_sent: usize,
    pub cursor_before: i64,
    pub cursor_after: i64,
}

impl RunReport {
    fn idle(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            batches_sent: 0,
            records_sent: 0,
            cursor_before: 0,
            cursor_after: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: usize,
    pub max_batches_per_run: usize,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    pub lang: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_batches_per_run: 20,
            lock_ttl: Duration::from_secs(15 * 60),
            lock_wait: Duration::ZERO,
            lang: "en".to_string(),
        }
    }
}

impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.export.batch_size,
            max_batches_per_run: config.export.max_batches_per_run,
            lock_ttl: config.export.lock.ttl,
            lock_wait: config.export.lock.wait,
            lang: config.platform.lang.clone(),
        }
    }
}

/// The storage-side collaborators of a run.
#[derive(Clone)]
pub struct ExportPorts {
    pub events: Arc<dyn EventStore>,
    pub references: Arc<dyn ReferenceStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub lock: Arc<dyn JobLock>,
}

impl ExportPorts {
    /// Use one backend for every port.
    pub fn shared<S>(storage: Arc<S>) -> Self
    where
        S: EventStore + ReferenceStore + SettingsStore + JobLock + 'static,
    {
        Self {
            events: storage.clone(),
            references: storage.clone(),
            settings: storage.clone(),
            lock: storage,
        }
    }
}

/// Runs one export invocation: lock, fetch → enrich → ship → advance, unlock.
pub struct RunCoordinator {
    fetcher: LogFetcher,
    enricher: Enricher,
    shipper: Arc<dyn BatchShipper>,
    cursor: CursorStore,
    settings: ExportSettings,
    lock: Arc<dyn JobLock>,
    pending_releases: PendingReleases,
    options: RunOptions,
}

impl RunCoordinator {
    pub fn new(ports: ExportPorts, shipper: Arc<dyn BatchShipper>, options: RunOptions) -> Self {
        Self {
            fetcher: LogFetcher::new(ports.events),
            enricher: Enricher::new(ports.references, options.lang.clone()),
            shipper,
            cursor: CursorStore::new(ports.settings.clone()),
            settings: ExportSettings::new(ports.settings),
            lock: ports.lock,
            pending_releases: PendingReleases::default(),
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Wait for locks left by cancelled or panicked runs to be given back.
    pub async fn finish_pending_releases(&self) {
        self.pending_releases.wait().await;
    }

    /// One scheduled invocation. Never runs concurrently with itself; the
    /// lock is released on every path out of the batch loop, including a
    /// dropped future or a panic.
    pub async fn run_once(&self) -> Result<RunReport, ExportError> {
        let token = acquire_with_wait(
            self.lock.as_ref(),
            LOCK_RESOURCE,
            self.options.lock_ttl,
            self.options.lock_wait,
        )
        .await
        .map_err(ExportError::Lock)?;

        let Some(token) = token else {
            info!("Already running, skip");
            return Ok(RunReport::idle(RunOutcome::Skipped));
        };

        let guard = LockGuard::new(self.lock.clone(), token, self.pending_releases.clone());
        let result = self.run_locked().await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release export lock, it will expire after its TTL");
        }

        if let Err(e) = &result {
            match e {
                ExportError::Persistence { .. } => error!(error = %e, "Cursor not saved after delivery, the batch will be sent again"),
                _ => error!(error = %e, "Export run aborted"),
            }
        }

        result
    }

    async fn run_locked(&self) -> Result<RunReport, ExportError> {
        let Some(endpoint) = self
            .settings
            .endpoint_url()
            .await
            .map_err(ExportError::Settings)?
        else {
            warn!("No endpoint configured");
            return Ok(RunReport::idle(RunOutcome::Unconfigured));
        };

        let targets = self
            .fetcher
            .allowed_targets(&self.settings)
            .await
            .map_err(ExportError::Targets)?;

        let cursor_before = self.cursor.get().await.map_err(ExportError::Cursor)?;
        let mut report = RunReport {
            outcome: RunOutcome::Done,
            batches_sent: 0,
            records_sent: 0,
            cursor_before,
            cursor_after: cursor_before,
        };
        let mut last_sent = cursor_before;

        while report.batches_sent < self.options.max_batches_per_run {
            let logs = self
                .fetcher
                .next(last_sent, self.options.batch_size, &targets)
                .await
                .map_err(|source| ExportError::Fetch {
                    after: last_sent,
                    source,
                })?;

            let (Some(first), Some(last)) = (logs.first(), logs.last()) else {
                info!("No more logs to send");
                return Ok(report);
            };
            let (first_id, last_id, count) = (first.id, last.id, logs.len());

            info!(
                batch = report.batches_sent + 1,
                count,
                first_id,
                "Sending batch of {} logs (starting from ID {})",
                count,
                first_id
            );

            let enriched = self
                .enricher
                .enrich(logs)
                .await
                .map_err(|source| ExportError::Enrich { first_id, source })?;

            match self.shipper.send(&endpoint, &enriched).await {
                Ok(receipt) => {
                    self.cursor
                        .set(last_id)
                        .await
                        .map_err(|source| ExportError::Persistence { last_id, source })?;

                    last_sent = last_id;
                    report.cursor_after = last_id;
                    report.batches_sent += 1;
                    report.records_sent += count;

                    info!(
                        last_id,
                        status = receipt.status,
                        bytes = receipt.bytes,
                        digest = %receipt.digest,
                        "Batch sent successfully. Last ID: {}",
                        last_id
                    );
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_from = last_sent + 1,
                        "Error sending batch, stopping. Will retry from ID {}",
                        last_sent + 1
                    );
                    report.outcome = RunOutcome::Partial(StopReason::DeliveryFailed);
                    return Ok(report);
                }
            }
        }

        info!(
            max_batches = self.options.max_batches_per_run,
            "Reached max batches ({}), will continue in next run",
            self.options.max_batches_per_run
        );
        report.outcome = RunOutcome::Partial(StopReason::BatchCap);
        Ok(report)
    }
}
