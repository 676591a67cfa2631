use super::traits::{JobLock, StorageError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Proof of ownership of a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub resource: String,
    pub owner: String,
}

impl LockToken {
    pub fn new(resource: &str) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            resource: resource.to_string(),
            owner: format!("{}:{}:{}", host, std::process::id(), uuid::Uuid::new_v4()),
        }
    }
}

/// Try to take `resource`, polling until `wait` has elapsed.
///
/// A zero `wait` makes exactly one attempt.
pub async fn acquire_with_wait(
    lock: &dyn JobLock,
    resource: &str,
    ttl: Duration,
    wait: Duration,
) -> Result<Option<LockToken>, StorageError> {
    // No representable deadline: keep polling
    let deadline = Instant::now().checked_add(wait);

    loop {
        if let Some(token) = lock.try_acquire(resource, ttl).await? {
            return Ok(Some(token));
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                std::cmp::min(POLL_INTERVAL, deadline - now)
            }
            None => POLL_INTERVAL,
        };

        tokio::time::sleep(pause).await;
    }
}

/// Releases started by guards that were dropped while still holding a lock.
#[derive(Clone, Default)]
pub struct PendingReleases(Arc<Mutex<Vec<JoinHandle<()>>>>);

impl PendingReleases {
    fn push(&self, handle: JoinHandle<()>) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Wait until every background release has finished.
    pub async fn wait(&self) {
        let handles = std::mem::take(
            &mut *self
                .0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Holds a lock token and gives it back on every exit path.
///
/// [`LockGuard::release`] is the normal path. Dropping a guard that still
/// holds its token (a cancelled future, a panic) spawns the release instead.
pub struct LockGuard {
    lock: Arc<dyn JobLock>,
    token: Option<LockToken>,
    pending: PendingReleases,
}

impl LockGuard {
    pub fn new(lock: Arc<dyn JobLock>, token: LockToken, pending: PendingReleases) -> Self {
        Self {
            lock,
            token: Some(token),
            pending,
        }
    }

    pub async fn release(mut self) -> Result<(), StorageError> {
        match self.token.take() {
            Some(token) => self.lock.release(&token).await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lock = self.lock.clone();
                let handle = runtime.spawn(async move {
                    if let Err(e) = lock.release(&token).await {
                        warn!(error = %e, resource = %token.resource, "Failed to release abandoned lock, it will expire after its TTL");
                    }
                });
                self.pending.push(handle);
            }
            Err(_) => {
                warn!(resource = %token.resource, "No runtime to release abandoned lock, it will expire after its TTL");
            }
        }
    }
}
