use super::settings::ExportSettings;
use super::targets::AllowedTargetSet;
use crate::record::LogRecord;
use crate::storage::traits::{EventStore, StorageError};
use std::sync::Arc;

/// Pulls the next page of unshipped records past a cursor.
#[derive(Clone)]
pub struct LogFetcher {
    events: Arc<dyn EventStore>,
}

impl LogFetcher {
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    /// Compute the target filter for one run.
    pub async fn allowed_targets(
        &self,
        settings: &ExportSettings,
    ) -> Result<AllowedTargetSet, StorageError> {
        let allow_list = settings.allowed_targets().await?;
        if allow_list.is_empty() {
            return Ok(AllowedTargetSet::All);
        }

        let observed = self.events.distinct_targets().await?;
        let set = AllowedTargetSet::resolve(&allow_list, observed);
        if set == AllowedTargetSet::All {
            tracing::warn!(
                configured = %allow_list.join(","),
                "No configured log target has been observed, sending all targets"
            );
        }
        Ok(set)
    }

    /// Up to `limit` records with `id > after`, ascending.
    ///
    /// Re-queries current state on every call, so a page that failed to ship
    /// is fetched again identically while the log is unchanged below it.
    pub async fn next(
        &self,
        after: i64,
        limit: usize,
        targets: &AllowedTargetSet,
    ) -> Result<Vec<LogRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let logs = self.events.fetch_after(after, limit, targets).await?;
        debug_assert!(logs.windows(2).all(|w| w[0].id < w[1].id));
        Ok(logs)
    }
}
