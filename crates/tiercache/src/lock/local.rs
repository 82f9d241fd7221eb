//! In-process lock service.
//!
//! Provides single-flight within one process when no cluster-wide lock
//! service is configured. Instances sharing one `LocalLock` (e.g. in tests)
//! contend exactly as they would on Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{DistributedLock, LockLease};
use crate::error::LockError;

#[derive(Default)]
pub struct LocalLock {
    /// One mutex per lock name, present while anyone holds or awaits it.
    slots: DashMap<String, Arc<Mutex<()>>>,
    /// Held guards keyed by lease token.
    held: DashMap<String, OwnedMutexGuard<()>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leases currently held.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let slot = Arc::clone(self.slots.entry(name.to_string()).or_default().value());

        match tokio::time::timeout(wait, slot.lock_owned()).await {
            Ok(guard) => {
                let token = Uuid::new_v4().to_string();
                self.held.insert(token.clone(), guard);
                Ok(Some(LockLease::new(name, token)))
            }
            Err(_) => Ok(None),
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        if self.held.remove(lease.token()).is_none() {
            tracing::debug!(lock = %lease.name(), "release of a lease not held");
            return Ok(());
        }
        self.slots
            .remove_if(lease.name(), |_, slot| Arc::strong_count(slot) == 1);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
