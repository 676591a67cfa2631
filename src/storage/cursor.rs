use super::traits::{SettingsStore, StorageError};
use std::sync::Arc;

/// Settings key holding the id of the last delivered log record.
pub const LAST_SENT_KEY: &str = "last_sent_id";

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Stored cursor is not a valid record id: {0:?}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CursorError>;

/// The export position: a single overwritable cell, no history.
#[derive(Clone)]
pub struct CursorStore {
    settings: Arc<dyn SettingsStore>,
}

impl CursorStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// Last delivered id, `0` when nothing was ever shipped.
    pub async fn get(&self) -> Result<i64> {
        match self.settings.get_setting(LAST_SENT_KEY).await? {
            None => Ok(0),
            Some(raw) if raw.trim().is_empty() => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| CursorError::Corrupt(raw)),
        }
    }

    pub async fn set(&self, position: i64) -> Result<()> {
        self.settings
            .set_setting(LAST_SENT_KEY, &position.to_string())
            .await?;
        tracing::debug!(position, "Cursor saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::duckdb::DuckDbStorage;

    async fn setup_storage() -> Arc<DuckDbStorage> {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        Arc::new(storage)
    }

    #[tokio::test]
    async fn test_cursor_defaults_to_zero() {
        let storage = setup_storage().await;
        let cursor = CursorStore::new(storage);
        assert_eq!(cursor.get().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cursor_set_overwrites() {
        let storage = setup_storage().await;
        let cursor = CursorStore::new(storage.clone());

        cursor.set(50).await.unwrap();
        cursor.set(50).await.unwrap();
        cursor.set(100).await.unwrap();

        assert_eq!(cursor.get().await.unwrap(), 100);
        assert_eq!(
            storage.get_setting(LAST_SENT_KEY).await.unwrap().as_deref(),
            Some("100")
        );
    }

    #[tokio::test]
    async fn test_cursor_rejects_garbage() {
        let storage = setup_storage().await;
        storage.set_setting(LAST_SENT_KEY, "12abc").await.unwrap();

        let cursor = CursorStore::new(storage);
        assert!(matches!(cursor.get().await, Err(CursorError::Corrupt(_))));
    }
}
