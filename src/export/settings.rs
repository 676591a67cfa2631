use super::targets::parse_allow_list;
use crate::storage::traits::{SettingsStore, StorageError};
use std::sync::Arc;

pub const ENDPOINT_URL_KEY: &str = "endpoint_url";
pub const LOG_TARGETS_KEY: &str = "log_targets";

/// Typed view over the runtime settings the export job reads each run.
#[derive(Clone)]
pub struct ExportSettings {
    store: Arc<dyn SettingsStore>,
}

impl ExportSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Remote endpoint, `None` when unset or blank.
    pub async fn endpoint_url(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .store
            .get_setting(ENDPOINT_URL_KEY)
            .await?
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()))
    }

    /// Admin allow-list of log targets; empty means all.
    pub async fn allowed_targets(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .store
            .get_setting(LOG_TARGETS_KEY)
            .await?
            .map(|raw| parse_allow_list(&raw))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::duckdb::DuckDbStorage;

    async fn setup() -> (Arc<DuckDbStorage>, ExportSettings) {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        let storage = Arc::new(storage);
        let settings = ExportSettings::new(storage.clone());
        (storage, settings)
    }

    #[tokio::test]
    async fn test_blank_endpoint_is_missing() {
        let (storage, settings) = setup().await;
        assert_eq!(settings.endpoint_url().await.unwrap(), None);

        storage.set_setting(ENDPOINT_URL_KEY, "   ").await.unwrap();
        assert_eq!(settings.endpoint_url().await.unwrap(), None);

        storage
            .set_setting(ENDPOINT_URL_KEY, " http://lrs:8089/moodle_log ")
            .await
            .unwrap();
        assert_eq!(
            settings.endpoint_url().await.unwrap().as_deref(),
            Some("http://lrs:8089/moodle_log")
        );
    }

    #[tokio::test]
    async fn test_allowed_targets() {
        let (storage, settings) = setup().await;
        assert!(settings.allowed_targets().await.unwrap().is_empty());

        storage
            .set_setting(LOG_TARGETS_KEY, "course, course_module")
            .await
            .unwrap();
        assert_eq!(
            settings.allowed_targets().await.unwrap(),
            vec!["course", "course_module"]
        );
    }
}
