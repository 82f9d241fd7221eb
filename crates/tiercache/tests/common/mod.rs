//! Test doubles shared by the integration tests.
#![allow(dead_code)]

pub mod fake_redis;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tiercache::{
    CacheError, DistributedLock, LocalCache, LockError, LockLease, MemorySharedCache, MemoryStore,
    MokaLocalCache, SharedCache,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub level: u32,
}

impl Character {
    pub fn new(name: &str, level: u32) -> Self {
        Self {
            name: name.to_string(),
            level,
        }
    }
}

pub fn l1<V: Clone + Send + Sync + 'static>(name: &str) -> Arc<dyn LocalCache<V>> {
    Arc::new(MokaLocalCache::new(name, 1000, Duration::from_secs(300)))
}

/// Shared layer over a [`MemoryStore`] whose operations can be made to fail.
pub struct FaultyShared {
    inner: MemorySharedCache,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    fail_evict: AtomicBool,
    fail_clear: AtomicBool,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl FaultyShared {
    pub fn new(store: &MemoryStore, name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: store.cache(name, Duration::from_secs(900)),
            fail_get: AtomicBool::new(false),
            fail_put: AtomicBool::new(false),
            fail_evict: AtomicBool::new(false),
            fail_clear: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        })
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
        self.fail_put.store(fail, Ordering::SeqCst);
        self.fail_evict.store(fail, Ordering::SeqCst);
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_evict(&self, fail: bool) {
        self.fail_evict.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls that reached this layer.
    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn check(flag: &AtomicBool) -> Result<(), CacheError> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::connection("injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedCache for FaultyShared {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_get)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_put)?;
        self.inner.put(key, value).await
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        Self::check(&self.fail_evict)?;
        self.inner.evict(key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Self::check(&self.fail_clear)?;
        self.inner.clear().await
    }
}

/// Lock service that cannot be reached.
pub struct UnavailableLock;

#[async_trait]
impl DistributedLock for UnavailableLock {
    async fn try_acquire(
        &self,
        _name: &str,
        _wait: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        Err(LockError::Unavailable("connection refused".into()))
    }

    async fn release(&self, _lease: &LockLease) -> Result<(), LockError> {
        Err(LockError::Unavailable("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }
}

/// Lock held by someone else for longer than any wait.
pub struct ContendedLock;

#[async_trait]
impl DistributedLock for ContendedLock {
    async fn try_acquire(
        &self,
        _name: &str,
        _wait: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        Ok(None)
    }

    async fn release(&self, _lease: &LockLease) -> Result<(), LockError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "contended"
    }
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
