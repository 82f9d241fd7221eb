//! Per-name access to local (L1) layers for the invalidation subscriber.

use std::sync::Arc;

use dashmap::DashMap;

use crate::local::LocalCache;

/// The part of an L1 the subscriber is allowed to touch.
///
/// Object-safe and value-type agnostic, so caches of different value types
/// can live in one registry.
pub trait LocalInvalidation: Send + Sync {
    fn evict(&self, key: &str);

    fn clear(&self);
}

struct LocalHandle<V>(Arc<dyn LocalCache<V>>);

impl<V: 'static> LocalInvalidation for LocalHandle<V> {
    fn evict(&self, key: &str) {
        self.0.evict(key);
    }

    fn clear(&self) {
        self.0.clear();
    }
}

/// Registry of the L1 layers living in this process, keyed by cache name.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct LocalCacheRegistry {
    caches: Arc<DashMap<String, Arc<dyn LocalInvalidation>>>,
}

impl LocalCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `l1` under its own name, replacing any previous registration.
    pub fn register<V: 'static>(&self, l1: Arc<dyn LocalCache<V>>) {
        let name = l1.name().to_string();
        tracing::debug!(cache = %name, "local cache registered for invalidation");
        self.caches.insert(name, Arc::new(LocalHandle(l1)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalInvalidation>> {
        self.caches.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
