//! Distributed mutual exclusion for single-flight loading.
//!
//! A lock is named deterministically from `(cache, key)`, so loaders of the
//! same entry contend on one lock while different entries never contend.
//! Holding a lock is represented by a [`LockGuard`], which releases the lease
//! on every exit path: explicitly via [`LockGuard::release`], or from `Drop`
//! when the holder returns early, is cancelled, or unwinds from a panic.

mod local;
mod redis;

pub use local::LocalLock;
pub use self::redis::RedisLock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LockError;

/// Proof of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    name: String,
    token: String,
}

impl LockLease {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique token identifying this holder; release is refused for any other token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// A cluster-wide lock service.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire `name`, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when the wait elapsed while another holder kept the
    /// lock, and `Err` when the lock service itself could not be reached.
    async fn try_acquire(&self, name: &str, wait: Duration)
    -> Result<Option<LockLease>, LockError>;

    /// Release a lease previously returned by `try_acquire`.
    async fn release(&self, lease: &LockLease) -> Result<(), LockError>;

    /// Name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}

/// Name of the single-flight lock guarding `key` in `cache`.
#[inline]
pub fn lock_name(prefix: &str, cache: &str, key: &str) -> String {
    format!("{prefix}:{cache}:{key}")
}

/// Scoped ownership of a lock lease.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    lease: Option<LockLease>,
}

impl LockGuard {
    pub fn new(lock: Arc<dyn DistributedLock>, lease: LockLease) -> Self {
        Self {
            lock,
            lease: Some(lease),
        }
    }

    /// Acquire `name` and wrap the lease in a guard.
    pub async fn acquire(
        lock: &Arc<dyn DistributedLock>,
        name: &str,
        wait: Duration,
    ) -> Result<Option<Self>, LockError> {
        let lease = lock.try_acquire(name, wait).await?;
        Ok(lease.map(|lease| Self::new(Arc::clone(lock), lease)))
    }

    pub fn lease(&self) -> Option<&LockLease> {
        self.lease.as_ref()
    }

    /// Release the lease now and wait for the lock service to confirm.
    pub async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            release_logged(self.lock.as_ref(), &lease).await;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = Arc::clone(&self.lock);
                handle.spawn(async move {
                    release_logged(lock.as_ref(), &lease).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    lock = %lease.name(),
                    "no runtime to release lock from drop, lease will expire on its own"
                );
            }
        }
    }
}

async fn release_logged(lock: &dyn DistributedLock, lease: &LockLease) {
    match lock.release(lease).await {
        Ok(()) => tracing::trace!(lock = %lease.name(), "lock released"),
        Err(e) => tracing::warn!(
            lock = %lease.name(),
            backend = lock.backend_name(),
            error = %e,
            "failed to release lock, lease will expire on its own"
        ),
    }
}
