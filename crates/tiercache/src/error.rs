//! Error types for the tiered cache engine.
//!
//! None of the collaborator errors defined here ever reach callers of
//! [`TieredCache`](crate::TieredCache): shared-layer and lock-service failures
//! are converted into misses or degradation paths at the orchestration layer.

use deadpool_redis::redis::RedisError;

/// Errors raised by a shared (L2) cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Could not obtain a connection to the shared layer.
    #[error("shared cache connection error: {0}")]
    Connection(String),

    /// The shared layer did not answer within its own timeout.
    #[error("shared cache operation timed out after {0}ms")]
    Timeout(u64),

    /// The shared layer rejected or failed a command.
    #[error("shared cache command error: {0}")]
    Command(String),

    /// A value could not be encoded for, or decoded from, the shared layer.
    #[error("codec error: {0}")]
    Codec(String),

    /// A cache name was requested with a value type different from the one
    /// it was first created with.
    #[error("cache '{name}' is already registered with a different value type")]
    TypeMismatch {
        /// Name of the cache.
        name: String,
    },
}

impl CacheError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }
}

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        if e.is_timeout() {
            Self::Command(format!("timeout: {e}"))
        } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            Self::Connection(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Errors raised by a distributed lock service.
///
/// A lock that is merely contended is not an error: `try_acquire` returns
/// `Ok(None)` when the bounded wait elapses.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock service unavailable: {0}")]
    Unavailable(String),

    #[error("lock command error: {0}")]
    Command(String),
}

impl From<RedisError> for LockError {
    fn from(e: RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for LockError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Errors that can occur on the broadcast channel.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("broadcast pool error: {0}")]
    Pool(String),

    #[error("broadcast connection error: {0}")]
    Connection(String),

    #[error("broadcast subscribe error: {0}")]
    Subscribe(String),

    #[error("broadcast publish error: {0}")]
    Publish(String),

    #[error("broadcast message error: {0}")]
    Message(String),

    /// The listener fell behind and the transport dropped this many messages.
    #[error("broadcast listener lagged, {0} messages lost")]
    Lagged(u64),

    #[error("broadcast stream ended")]
    StreamEnded,
}

/// Errors produced while encoding or decoding an invalidation event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid event payload: {0}")]
    Serialization(String),

    /// An `EVICT` event arrived without a key.
    #[error("EVICT event for cache '{cache_name}' has no key")]
    MissingKey { cache_name: String },

    /// A `CLEAR_ALL` event arrived carrying a key.
    #[error("CLEAR_ALL event for cache '{cache_name}' must not carry a key")]
    UnexpectedKey { cache_name: String },
}
