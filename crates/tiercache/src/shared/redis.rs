//! Redis-backed shared layer.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, AsyncCommands};

use super::{SharedCache, cache_prefix, namespaced_key};
use crate::error::CacheError;

/// Keys deleted per `DEL` while clearing a cache.
const CLEAR_BATCH: usize = 500;

/// One named cache stored in Redis with a per-cache TTL.
///
/// Every operation is bounded by `timeout`; a slow Redis surfaces as
/// [`CacheError::Timeout`] instead of stalling the caller.
#[derive(Clone)]
pub struct RedisSharedCache {
    pool: Pool,
    name: String,
    ttl: Duration,
    timeout: Duration,
}

impl RedisSharedCache {
    pub fn new(pool: Pool, name: impl Into<String>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            pool,
            name: name.into(),
            ttl,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        Ok(self.pool.get().await?)
    }
}

/// `SCAN MATCH` pattern selecting every key of `cache` and nothing else.
fn scan_pattern(cache: &str) -> String {
    let prefix = cache_prefix(cache);
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let storage_key = namespaced_key(&self.name, key);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let data: Option<Vec<u8>> = conn.get(&storage_key).await?;
            Ok(data)
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let storage_key = namespaced_key(&self.name, key);
        let ttl_secs = self.ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.set_ex::<_, _, ()>(&storage_key, value, ttl_secs).await?;
            tracing::trace!(key = %storage_key, ttl_secs, "redis SETEX");
            Ok(())
        })
        .await
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        let storage_key = namespaced_key(&self.name, key);
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(&storage_key).await?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let pattern = scan_pattern(&self.name);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let mut cursor: u64 = 0;
            let mut removed = 0usize;

            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(CLEAR_BATCH)
                    .query_async(&mut conn)
                    .await?;

                if !keys.is_empty() {
                    removed += keys.len();
                    conn.del::<_, ()>(keys).await?;
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            tracing::debug!(cache = %self.name, removed, "redis cache cleared");
            Ok(())
        })
        .await
    }
}
