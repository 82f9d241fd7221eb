//! In-process shared layer.
//!
//! Used when Redis is disabled or unreachable, and by tests to stand in for a
//! cluster: several tiered caches cloned from the same [`MemoryStore`] see
//! each other's writes exactly as they would through Redis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SharedCache, cache_prefix, namespaced_key};
use crate::error::CacheError;

/// A stored value with TTL support.
///
/// The data is wrapped in `Arc` so cloning an entry out of the map does not
/// copy the payload.
#[derive(Clone, Debug)]
struct StoredEntry {
    data: Arc<Vec<u8>>,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            stored_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Backing map shared by every [`MemorySharedCache`] cloned from it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named cache with its own TTL to this store.
    pub fn cache(&self, name: impl Into<String>, ttl: Duration) -> MemorySharedCache {
        MemorySharedCache {
            name: name.into(),
            ttl,
            store: self.clone(),
        }
    }

    /// Number of stored entries across all caches, including expired ones
    /// not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One named cache inside a [`MemoryStore`].
#[derive(Clone)]
pub struct MemorySharedCache {
    name: String,
    ttl: Duration,
    store: MemoryStore,
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let storage_key = namespaced_key(&self.name, key);
        let entries = &self.store.entries;

        if let Some(entry) = entries.get(&storage_key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.as_ref().clone()));
            }
            drop(entry);
            entries.remove_if(&storage_key, |_, e| e.is_expired());
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.store.entries.insert(
            namespaced_key(&self.name, key),
            StoredEntry::new(value, self.ttl),
        );
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.store.entries.remove(&namespaced_key(&self.name, key));
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let prefix = cache_prefix(&self.name);
        self.store.entries.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}
