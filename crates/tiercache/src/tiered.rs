//! Two-tier cache orchestration.
//!
//! ## Read path
//!
//! L1 first; on an L1 miss, L2 with backfill into L1. A failing L2 reads as
//! absent.
//!
//! ## Write path
//!
//! L2 first. L1 is only written after L2 accepted the value, so L1 can never
//! hold a value newer than L2. Removals go the other way round: L2 removal is
//! best-effort, L1 removal always happens.
//!
//! ## Single-flight
//!
//! ```text
//! get_or_load(key)
//!   ├─ L1 hit / L2 hit ─────────────────────────────► value
//!   └─ miss ─► try_acquire(lock, wait)
//!        ├─ acquired ─► L2 double-check ─► hit ─────► value
//!        │                              └─ loader ─► write-through ─► value
//!        └─ timeout / lock service down ─► loader ─► write-through ─► value
//! ```
//!
//! Shared-layer and lock-service failures never reach callers; they are
//! logged and counted. Loader errors are returned unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec;
use crate::config::default_instance_id;
use crate::event::InvalidationEvent;
use crate::invalidation::InvalidationPublisher;
use crate::local::LocalCache;
use crate::lock::{DistributedLock, LocalLock, LockGuard, lock_name};
use crate::metrics::{CacheCounters, CacheStats, LockFailure, SharedOp};
use crate::shared::SharedCache;

/// Values a [`TieredCache`] can hold.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCK_PREFIX: &str = "cache:sf";

pub struct TieredCache<V> {
    name: String,
    instance_id: String,
    l1: Arc<dyn LocalCache<V>>,
    l2: Arc<dyn SharedCache>,
    lock: Arc<dyn DistributedLock>,
    lock_prefix: String,
    lock_wait: Duration,
    publisher: Option<Arc<InvalidationPublisher>>,
    counters: Arc<CacheCounters>,
}

impl<V: CacheValue> TieredCache<V> {
    /// Start building a cache named after `l1`.
    pub fn builder(l1: Arc<dyn LocalCache<V>>, l2: Arc<dyn SharedCache>) -> TieredCacheBuilder<V> {
        TieredCacheBuilder::new(l1, l2)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Direct access to the local layer, bypassing L2 and invalidation.
    pub fn local(&self) -> &Arc<dyn LocalCache<V>> {
        &self.l1
    }

    pub fn counters(&self) -> &Arc<CacheCounters> {
        &self.counters
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Look `key` up in L1, then L2.
    pub async fn get(&self, key: &str) -> Option<V> {
        let found = self.lookup(key).await;
        if found.is_none() {
            self.counters.record_miss();
            tracing::trace!(cache = %self.name, key = %key, "cache miss");
        }
        found
    }

    /// Store `value` in L2, then L1, then tell other instances to drop their copy.
    ///
    /// If L2 rejects the value, L1 is left untouched and nothing is published.
    pub async fn put(&self, key: &str, value: V) {
        if self.write_through(key, &value).await {
            self.publish(InvalidationEvent::evict(&self.name, key, &self.instance_id))
                .await;
        }
    }

    /// Remove `key` from both layers and from every other instance's L1.
    pub async fn evict(&self, key: &str) {
        if let Err(e) = self.l2.evict(key).await {
            self.counters.record_l2_failure(SharedOp::Evict);
            tracing::warn!(cache = %self.name, key = %key, error = %e, "L2 evict failed, evicting L1 anyway");
        }
        self.l1.evict(key);
        self.publish(InvalidationEvent::evict(&self.name, key, &self.instance_id))
            .await;
    }

    /// Remove every key of this cache from both layers and from every other
    /// instance's L1.
    pub async fn clear(&self) {
        if let Err(e) = self.l2.clear().await {
            self.counters.record_l2_failure(SharedOp::Clear);
            tracing::warn!(cache = %self.name, error = %e, "L2 clear failed, clearing L1 anyway");
        }
        self.l1.clear();
        self.publish(InvalidationEvent::clear_all(&self.name, &self.instance_id))
            .await;
    }

    /// Return the cached value of `key`, computing it with `loader` on a miss.
    ///
    /// Concurrent callers missing the same key, in this or any other instance,
    /// are serialized on a lock named after `(cache, key)`; only the first runs
    /// `loader`, the rest find its result in L2. If the lock cannot be had
    /// within the configured wait, `loader` runs without coordination.
    ///
    /// The lock is released on every exit, including a panicking loader.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(key).await {
            return Ok(value);
        }
        self.counters.record_miss();

        let lock_name = lock_name(&self.lock_prefix, &self.name, key);
        match LockGuard::acquire(&self.lock, &lock_name, self.lock_wait).await {
            Ok(Some(guard)) => {
                let result = self.load_exclusive(key, loader).await;
                guard.release().await;
                result
            }
            Ok(None) => {
                self.counters.record_lock_failure(LockFailure::Timeout);
                tracing::warn!(
                    cache = %self.name,
                    key = %key,
                    lock = %lock_name,
                    wait_ms = self.lock_wait.as_millis() as u64,
                    "lock wait elapsed, loading without single-flight"
                );
                self.load_and_store(key, loader).await
            }
            Err(e) => {
                self.counters.record_lock_failure(LockFailure::Unavailable);
                tracing::warn!(
                    cache = %self.name,
                    key = %key,
                    lock = %lock_name,
                    backend = self.lock.backend_name(),
                    error = %e,
                    "lock service unavailable, loading without single-flight"
                );
                self.load_and_store(key, loader).await
            }
        }
    }

    async fn lookup(&self, key: &str) -> Option<V> {
        if let Some(value) = self.l1.get(key) {
            self.counters.record_l1_hit();
            tracing::trace!(cache = %self.name, key = %key, "L1 hit");
            return Some(value);
        }

        let value = self.read_shared(key).await?;
        self.backfill(key, &value);
        Some(value)
    }

    /// Read `key` from L2; failures read as absent.
    async fn read_shared(&self, key: &str) -> Option<V> {
        let bytes = match self.l2.get(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                self.counters.record_l2_failure(SharedOp::Get);
                tracing::warn!(cache = %self.name, key = %key, error = %e, "L2 read failed, treating as miss");
                return None;
            }
        };

        match codec::decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.record_l2_failure(SharedOp::Get);
                tracing::warn!(cache = %self.name, key = %key, error = %e, "undecodable L2 entry, treating as miss");
                None
            }
        }
    }

    fn backfill(&self, key: &str, value: &V) {
        self.l1.put(key, value.clone());
        self.counters.record_l2_hit();
        tracing::debug!(cache = %self.name, key = %key, "L2 hit, backfilled L1");
    }

    async fn load_exclusive<F, Fut, E>(&self, key: &str, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Another caller may have finished loading while we waited for the lock.
        if let Some(value) = self.read_shared(key).await {
            self.backfill(key, &value);
            return Ok(value);
        }
        self.load_and_store(key, loader).await
    }

    async fn load_and_store<F, Fut, E>(&self, key: &str, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let value = loader().await?;
        self.write_through(key, &value).await;
        Ok(value)
    }

    /// L2 then L1. Returns whether L1 was written.
    async fn write_through(&self, key: &str, value: &V) -> bool {
        let stored = match codec::encode(value) {
            Ok(bytes) => self.l2.put(key, bytes).await,
            Err(e) => Err(e),
        };

        match stored {
            Ok(()) => {
                self.l1.put(key, value.clone());
                tracing::trace!(cache = %self.name, key = %key, "stored in L2 and L1");
                true
            }
            Err(e) => {
                self.counters.record_l2_failure(SharedOp::Put);
                tracing::warn!(cache = %self.name, key = %key, error = %e, "L2 write failed, L1 left unchanged");
                false
            }
        }
    }

    async fn publish(&self, event: InvalidationEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(&event).await;
        }
    }
}

impl<V> std::fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("lock_backend", &self.lock.backend_name())
            .field("lock_wait", &self.lock_wait)
            .field("publishes", &self.publisher.is_some())
            .finish()
    }
}

/// Builder for [`TieredCache`].
pub struct TieredCacheBuilder<V> {
    l1: Arc<dyn LocalCache<V>>,
    l2: Arc<dyn SharedCache>,
    lock: Option<Arc<dyn DistributedLock>>,
    publisher: Option<Arc<InvalidationPublisher>>,
    instance_id: Option<String>,
    lock_prefix: String,
    lock_wait: Duration,
    counters: Option<Arc<CacheCounters>>,
}

impl<V: CacheValue> TieredCacheBuilder<V> {
    pub fn new(l1: Arc<dyn LocalCache<V>>, l2: Arc<dyn SharedCache>) -> Self {
        Self {
            l1,
            l2,
            lock: None,
            publisher: None,
            instance_id: None,
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            lock_wait: DEFAULT_LOCK_WAIT,
            counters: None,
        }
    }

    /// Lock service used for single-flight; defaults to an in-process lock.
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Publisher of invalidation events; without one, nothing is broadcast.
    pub fn with_publisher(mut self, publisher: Arc<InvalidationPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Reuse existing counters instead of registering new ones.
    pub fn with_counters(mut self, counters: Arc<CacheCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn build(self) -> TieredCache<V> {
        let name = self.l1.name().to_string();
        if self.l2.name() != name {
            tracing::warn!(
                l1 = %name,
                l2 = %self.l2.name(),
                "local and shared layers are bound to different cache names"
            );
        }

        let counters = self
            .counters
            .unwrap_or_else(|| Arc::new(CacheCounters::new(&name)));

        TieredCache {
            instance_id: self.instance_id.unwrap_or_else(default_instance_id),
            l1: self.l1,
            l2: self.l2,
            lock: self
                .lock
                .unwrap_or_else(|| Arc::new(LocalLock::new()) as Arc<dyn DistributedLock>),
            lock_prefix: self.lock_prefix,
            lock_wait: self.lock_wait,
            publisher: self.publisher,
            counters,
            name,
        }
    }
}
