//! Shared (L2) cache layer.
//!
//! L2 is reachable by every instance and is the source of truth for cached
//! values. Every call may fail; the tiered cache converts those failures into
//! misses or degradation paths, so they never reach its callers.
//!
//! Values cross this boundary as encoded bytes. Keys are namespaced per cache
//! as `{len}:{cache}::{key}`, where `len` is the byte length of the cache name.
//! The length makes the split unambiguous even when names or keys contain
//! `::`, so a cache can be cleared without touching its neighbours.

mod memory;
mod redis;

pub use memory::{MemorySharedCache, MemoryStore};
pub use self::redis::RedisSharedCache;

use async_trait::async_trait;

use crate::error::CacheError;

/// Capability interface of a shared cache bound to one logical cache name.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Logical cache name.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    async fn evict(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key of this cache (and only this cache).
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Prefix shared by every storage key of `cache`, and by no other cache.
#[inline]
pub fn cache_prefix(cache: &str) -> String {
    format!("{}:{cache}::", cache.len())
}

/// Storage key of `key` inside cache `cache`.
#[inline]
pub fn namespaced_key(cache: &str, key: &str) -> String {
    let mut storage_key = cache_prefix(cache);
    storage_key.push_str(key);
    storage_key
}
