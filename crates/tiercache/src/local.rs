//! Local (L1) cache layer.
//!
//! L1 is process-local and assumed non-failing. Its eviction policy belongs
//! to the implementation; [`MokaLocalCache`] bounds it by entry count and
//! time-to-live.

use std::time::Duration;

use moka::sync::Cache;

/// Capability interface of a process-local cache.
///
/// Implementations must be thread-safe for single-key operations; the
/// tiered cache performs no locking of its own around L1.
pub trait LocalCache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn put(&self, key: &str, value: V);

    fn evict(&self, key: &str);

    fn clear(&self);

    /// Logical cache name.
    fn name(&self) -> &str;
}

/// Bounded L1 backed by `moka`.
pub struct MokaLocalCache<V> {
    name: String,
    inner: Cache<String, V>,
}

impl<V> MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_entries` values, each for at most `ttl`.
    pub fn new(name: impl Into<String>, max_entries: u64, ttl: Duration) -> Self {
        let name = name.into();
        let inner = Cache::builder()
            .name(&name)
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { name, inner }
    }

    /// Number of live entries after pending maintenance has run.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl<V> LocalCache<V> for MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: V) {
        self.inner.insert(key.to_string(), value);
    }

    fn evict(&self, key: &str) {
        self.inner.invalidate(key);
    }

    fn clear(&self) {
        self.inner.invalidate_all();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_evict() {
        let cache = MokaLocalCache::new("character", 100, Duration::from_secs(60));
        cache.put("a", 1u32);
        cache.put("b", 2u32);

        assert_eq!(cache.get("a"), Some(1));
        cache.evict("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.name(), "character");
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = MokaLocalCache::new("character", 100, Duration::from_secs(60));
        for i in 0..5u32 {
            cache.put(&format!("k{i}"), i);
        }
        cache.clear();

        for i in 0..5u32 {
            assert_eq!(cache.get(&format!("k{i}")), None);
        }
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = MokaLocalCache::new("short", 100, Duration::from_millis(20));
        cache.put("k", "v".to_string());
        assert!(cache.get("k").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
    }
}
