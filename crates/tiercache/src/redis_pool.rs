//! Redis connection pool construction.

use std::time::Duration;

use deadpool_redis::Pool;

use crate::config::RedisConfig;
use crate::error::CacheError;

/// Create a pool from `config` and check that Redis answers.
pub async fn connect(config: &RedisConfig) -> Result<Pool, CacheError> {
    let timeout = Duration::from_millis(config.timeout_ms);

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::connection(format!("failed to create Redis pool: {e}")))?;

    // Test connection
    let mut conn = pool.get().await?;
    let _: String = deadpool_redis::redis::cmd("PING")
        .query_async(&mut conn)
        .await?;

    tracing::info!(url = %config.url, pool_size = config.pool_size, "connected to Redis");
    Ok(pool)
}
