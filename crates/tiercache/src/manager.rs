//! Pool of named tiered caches sharing one set of collaborators.
//!
//! All caches of a manager share the shared-layer backend, the lock service,
//! the broadcast channel and the instance id. Each name is built once; later
//! requests for the same name return the same instance.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::Pool;

use crate::broadcast::{BroadcastChannel, LocalBroadcast, RedisBroadcast};
use crate::config::TierCacheConfig;
use crate::error::CacheError;
use crate::invalidation::{InvalidationPublisher, InvalidationSubscriber, LocalCacheRegistry};
use crate::local::{LocalCache, MokaLocalCache};
use crate::lock::{DistributedLock, LocalLock, RedisLock};
use crate::metrics::{CacheCounters, CacheStats, InvalidationCounters, InvalidationStats};
use crate::redis_pool;
use crate::shared::{MemoryStore, RedisSharedCache, SharedCache};
use crate::tiered::{CacheValue, TieredCache};

type AnyCache = Arc<dyn Any + Send + Sync>;

/// Where shared-layer entries live.
#[derive(Clone)]
pub enum SharedBackend {
    /// In-process store; only caches built over clones of it share entries.
    Memory(MemoryStore),
    Redis { pool: Pool, timeout: Duration },
}

impl SharedBackend {
    fn cache(&self, name: &str, ttl: Duration) -> Arc<dyn SharedCache> {
        match self {
            Self::Memory(store) => Arc::new(store.cache(name, ttl)),
            Self::Redis { pool, timeout } => {
                Arc::new(RedisSharedCache::new(pool.clone(), name, ttl, *timeout))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis { .. } => "redis",
        }
    }
}

pub struct TieredCacheManager {
    config: TierCacheConfig,
    instance_id: String,
    backend: SharedBackend,
    lock: Arc<dyn DistributedLock>,
    publisher: Option<Arc<InvalidationPublisher>>,
    subscriber: Option<Arc<InvalidationSubscriber>>,
    registry: LocalCacheRegistry,
    invalidation_counters: Arc<InvalidationCounters>,
    caches: DashMap<String, AnyCache>,
    counters: DashMap<String, Arc<CacheCounters>>,
}

impl TieredCacheManager {
    pub fn builder(config: TierCacheConfig) -> TieredCacheManagerBuilder {
        TieredCacheManagerBuilder::new(config)
    }

    /// Build a manager from configuration, connecting to Redis when enabled.
    ///
    /// Falls back to in-process collaborators when Redis is disabled or
    /// cannot be reached, so a single instance keeps working without it.
    pub async fn connect(config: TierCacheConfig) -> Self {
        if !config.redis.enabled {
            tracing::info!("Redis disabled, using in-process shared layer, lock and broadcast");
            return Self::builder(config).build();
        }

        tracing::info!(url = %config.redis.url, "Connecting to Redis");
        match redis_pool::connect(&config.redis).await {
            Ok(pool) => {
                let lock = RedisLock::new(pool.clone())
                    .with_lease(config.lock.lease())
                    .with_retry_interval(config.lock.retry_interval())
                    .with_command_timeout(config.redis.timeout())
                    .with_watchdog(config.lock.watchdog);
                let broadcast = RedisBroadcast::new(pool.clone(), config.redis.url.clone())
                    .with_timeout(config.redis.timeout());
                let backend = SharedBackend::Redis {
                    pool,
                    timeout: config.redis.timeout(),
                };

                Self::builder(config)
                    .with_shared_backend(backend)
                    .with_lock(Arc::new(lock))
                    .with_broadcast(Arc::new(broadcast))
                    .build()
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to Redis. Falling back to in-process layers."
                );
                Self::builder(config).build()
            }
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &TierCacheConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn lock_backend_name(&self) -> &'static str {
        self.lock.backend_name()
    }

    /// The cache named `name`, built on first request.
    ///
    /// Returns once the cache's invalidation topic is subscribed, also when
    /// another caller is still building the same cache concurrently.
    ///
    /// Returns [`CacheError::TypeMismatch`] if `name` already exists with a
    /// different value type.
    pub async fn cache<V: CacheValue>(&self, name: &str) -> Result<Arc<TieredCache<V>>, CacheError> {
        let (cache, created) = match self.caches.entry(name.to_string()) {
            Entry::Occupied(entry) => (downcast(Arc::clone(entry.get()), name)?, false),
            Entry::Vacant(entry) => {
                let cache = Arc::new(self.build_cache::<V>(name));
                entry.insert(Arc::clone(&cache) as AnyCache);
                (cache, true)
            }
        };

        if let Some(subscriber) = &self.subscriber {
            subscriber.watch(name).await;
        }
        if created {
            tracing::info!(
                cache = %name,
                instance_id = %self.instance_id,
                backend = self.backend.name(),
                "tiered cache created"
            );
        }
        Ok(cache)
    }

    fn build_cache<V: CacheValue>(&self, name: &str) -> TieredCache<V> {
        let spec = self.config.spec_for(name);
        let l1: Arc<dyn LocalCache<V>> =
            Arc::new(MokaLocalCache::new(name, spec.l1_max_entries, spec.l1_ttl()));
        let l2 = self.backend.cache(name, spec.l2_ttl());
        self.registry.register(Arc::clone(&l1));

        let counters = self
            .counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CacheCounters::new(name)))
            .clone();

        let mut builder = TieredCache::builder(l1, l2)
            .with_lock(Arc::clone(&self.lock))
            .with_instance_id(&self.instance_id)
            .with_lock_prefix(&self.config.lock.key_prefix)
            .with_lock_wait(self.config.lock.wait())
            .with_counters(counters);
        if let Some(publisher) = &self.publisher {
            builder = builder.with_publisher(Arc::clone(publisher));
        }
        builder.build()
    }

    /// Names of the caches built so far, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats_for(&self, name: &str) -> Option<CacheStats> {
        self.counters.get(name).map(|c| c.snapshot())
    }

    /// Statistics of every cache, sorted by name.
    pub fn stats(&self) -> Vec<(String, CacheStats)> {
        let mut stats: Vec<(String, CacheStats)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub fn invalidation_stats(&self) -> InvalidationStats {
        self.invalidation_counters.snapshot()
    }

    /// The local layers of every cache, as seen by the invalidation subscriber.
    pub fn local_registry(&self) -> &LocalCacheRegistry {
        &self.registry
    }

    pub fn subscriber(&self) -> Option<&Arc<InvalidationSubscriber>> {
        self.subscriber.as_ref()
    }

    /// Stop the invalidation listeners.
    pub async fn shutdown(&self) {
        if let Some(subscriber) = &self.subscriber {
            subscriber.shutdown().await;
        }
    }
}

fn downcast<V: CacheValue>(cache: AnyCache, name: &str) -> Result<Arc<TieredCache<V>>, CacheError> {
    cache
        .downcast::<TieredCache<V>>()
        .map_err(|_| CacheError::TypeMismatch {
            name: name.to_string(),
        })
}

/// Builder for [`TieredCacheManager`].
///
/// Collaborators that are not set default to their in-process versions.
pub struct TieredCacheManagerBuilder {
    config: TierCacheConfig,
    instance_id: Option<String>,
    backend: Option<SharedBackend>,
    lock: Option<Arc<dyn DistributedLock>>,
    broadcast: Option<Arc<dyn BroadcastChannel>>,
}

impl TieredCacheManagerBuilder {
    pub fn new(config: TierCacheConfig) -> Self {
        Self {
            config,
            instance_id: None,
            backend: None,
            lock: None,
            broadcast: None,
        }
    }

    /// Override the configured instance id.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_shared_backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn with_broadcast(mut self, broadcast: Arc<dyn BroadcastChannel>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn build(self) -> TieredCacheManager {
        let config = self.config;
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| config.resolve_instance_id());
        let registry = LocalCacheRegistry::new();
        let invalidation_counters = Arc::new(InvalidationCounters::new());

        let (publisher, subscriber) = if config.invalidation.enabled {
            let broadcast = self
                .broadcast
                .unwrap_or_else(|| Arc::new(LocalBroadcast::new()) as Arc<dyn BroadcastChannel>);
            let publisher = InvalidationPublisher::new(
                Arc::clone(&broadcast),
                config.invalidation.topic_prefix.clone(),
                Arc::clone(&invalidation_counters),
            );
            let subscriber = InvalidationSubscriber::new(
                instance_id.clone(),
                broadcast,
                config.invalidation.topic_prefix.clone(),
                registry.clone(),
                Arc::clone(&invalidation_counters),
            )
            .with_max_backoff(Duration::from_secs(
                config.invalidation.reconnect_max_backoff_secs,
            ));
            (Some(Arc::new(publisher)), Some(Arc::new(subscriber)))
        } else {
            tracing::info!("cache invalidation disabled");
            (None, None)
        };

        TieredCacheManager {
            instance_id,
            backend: self
                .backend
                .unwrap_or_else(|| SharedBackend::Memory(MemoryStore::new())),
            lock: self
                .lock
                .unwrap_or_else(|| Arc::new(LocalLock::new()) as Arc<dyn DistributedLock>),
            publisher,
            subscriber,
            registry,
            invalidation_counters,
            caches: DashMap::new(),
            counters: DashMap::new(),
            config,
        }
    }
}
