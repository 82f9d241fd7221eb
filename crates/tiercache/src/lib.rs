//! # tiercache
//!
//! Two-tier cache: a bounded in-process layer (L1) in front of a shared layer
//! (L2) reachable by every instance.
//!
//! ## Overview
//!
//! - Reads go L1, then L2 with backfill into L1.
//! - Writes go L2 first; L1 is only written once L2 accepted the value.
//! - Removals always clear L1, even when L2 is unavailable.
//! - [`TieredCache::get_or_load`] serializes loaders of the same key across
//!   all instances with a distributed lock (single-flight).
//! - Every write, evict and clear broadcasts an [`InvalidationEvent`] so other
//!   instances drop their L1 copy; each instance skips its own events.
//!
//! L2, the lock service and the broadcast channel are Redis when available,
//! and in-process stand-ins otherwise.
//!
//! ## Example
//!
//! ```ignore
//! use tiercache::{TierCacheConfig, TieredCacheManager};
//!
//! let manager = TieredCacheManager::connect(TierCacheConfig::default()).await;
//! let characters = manager.cache::<Character>("character").await?;
//!
//! let character = characters
//!     .get_or_load("user-1", || async { repository.load("user-1").await })
//!     .await?;
//! ```

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod invalidation;
pub mod local;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod observability;
pub mod redis_pool;
pub mod shared;
pub mod tiered;

pub use broadcast::{BroadcastChannel, LocalBroadcast, MessageStream, RedisBroadcast};
pub use config::{
    CacheSpec, InvalidationConfig, LockConfig, LoggingConfig, RedisConfig, TierCacheConfig,
};
pub use error::{BroadcastError, CacheError, EventError, LockError};
pub use event::{InvalidationEvent, InvalidationType};
pub use invalidation::{
    Disposition, InvalidationPublisher, InvalidationSubscriber, LocalCacheRegistry,
    LocalInvalidation,
};
pub use local::{LocalCache, MokaLocalCache};
pub use lock::{DistributedLock, LocalLock, LockGuard, LockLease, RedisLock};
pub use manager::{SharedBackend, TieredCacheManager, TieredCacheManagerBuilder};
pub use metrics::{CacheCounters, CacheStats, InvalidationCounters, InvalidationStats};
pub use observability::{init_tracing_with_level, set_log_level};
pub use shared::{MemorySharedCache, MemoryStore, RedisSharedCache, SharedCache};
pub use tiered::{CacheValue, TieredCache, TieredCacheBuilder};
