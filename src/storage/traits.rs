use crate::export::targets::AllowedTargetSet;
use crate::record::{CourseRef, LogRecord, ModuleRef, UserRef};
use crate::storage::lock::LockToken;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Generic(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Read side of the platform's event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Records with `id > after`, a non-zero user and a target in `targets`,
    /// ascending by id, at most `limit` of them.
    async fn fetch_after(
        &self,
        after: i64,
        limit: usize,
        targets: &AllowedTargetSet,
    ) -> Result<Vec<LogRecord>, StorageError>;

    /// Every distinct `target` value present in the log.
    async fn distinct_targets(&self) -> Result<Vec<String>, StorageError>;
}

/// Bulk lookups into users, courses and course modules.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn users(&self, ids: &[i64]) -> Result<HashMap<i64, UserRef>, StorageError>;

    async fn courses(&self, ids: &[i64]) -> Result<HashMap<i64, CourseRef>, StorageError>;

    /// All live modules of one course, keyed by course module id.
    async fn module_index(&self, course_id: i64) -> Result<HashMap<i64, ModuleRef>, StorageError>;
}

/// Mutable key/value configuration storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, name: &str) -> Result<Option<String>, StorageError>;

    async fn set_setting(&self, name: &str, value: &str) -> Result<(), StorageError>;

    async fn list_settings(&self) -> Result<Vec<(String, String)>, StorageError>;
}

/// Time-boxed mutual exclusion keyed by resource name.
#[async_trait]
pub trait JobLock: Send + Sync {
    /// Returns `None` when another live owner holds `resource`.
    async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, StorageError>;

    async fn release(&self, token: &LockToken) -> Result<(), StorageError>;
}
