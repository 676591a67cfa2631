pub mod cursor;
pub mod duckdb;
pub mod lock;
pub mod traits;

pub use cursor::{CursorError, CursorStore};
pub use lock::{LockGuard, LockToken, PendingReleases};
pub use traits::{EventStore, JobLock, ReferenceStore, SettingsStore, StorageError};
