//! Redis-backed lock service.
//!
//! Acquisition is `SET name token NX PX lease`, retried until the caller's
//! wait elapses. The lease bounds how long a crashed holder can block others.
//! While a lease is held, a watchdog task keeps extending it so that a slow
//! loader does not lose the lock halfway through.
//!
//! Release and renewal only touch the key if it still carries the holder's
//! token, so an expired holder can never delete a successor's lock.
//!
//! Every attempt checks a connection out of the shared pool and hands it back
//! before sleeping, so waiters never starve the holder of connections. Each
//! round trip is bounded by the command timeout; a Redis that stops answering
//! surfaces as [`LockError::Unavailable`] instead of stalling the caller.

use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::redis::{self, Script};
use deadpool_redis::{Pool, PoolError, TimeoutType};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use super::{DistributedLock, LockLease};
use crate::error::LockError;

static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end",
    )
});

static RENEW_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end",
    )
});

pub struct RedisLock {
    pool: Pool,
    lease: Duration,
    retry_interval: Duration,
    command_timeout: Duration,
    watchdog: bool,
    watchdogs: Arc<DashMap<String, JoinHandle<()>>>,
}

impl RedisLock {
    /// Defaults: 30s lease, 50ms retry interval, 5s command timeout, watchdog enabled.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            lease: Duration::from_secs(30),
            retry_interval: Duration::from_millis(50),
            command_timeout: Duration::from_secs(5),
            watchdog: true,
            watchdogs: Arc::new(DashMap::new()),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Longest a single Redis round trip may take before the lock service
    /// is treated as unavailable.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Enable or disable automatic lease renewal.
    pub fn with_watchdog(mut self, enabled: bool) -> Self {
        self.watchdog = enabled;
        self
    }

    /// Number of leases currently kept alive by a watchdog.
    pub fn active_watchdogs(&self) -> usize {
        self.watchdogs.len()
    }

    fn lease_ms(&self) -> u64 {
        (self.lease.as_millis() as u64).max(1)
    }

    /// One `SET NX` round trip.
    ///
    /// Returns `Ok(false)` when the key is held by someone else, and also when
    /// no pooled connection became free within the remaining wait: the pool is
    /// shared with the holder, so a drained pool is contention, not an outage.
    async fn set_if_absent(
        &self,
        name: &str,
        token: &str,
        lease_ms: u64,
        deadline: Instant,
    ) -> Result<bool, LockError> {
        // A call whose wait already ran out still gets one short attempt.
        let remaining = || {
            deadline
                .saturating_duration_since(Instant::now())
                .max(self.retry_interval)
        };

        let mut conn = match tokio::time::timeout(remaining(), self.pool.get()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(PoolError::Timeout(TimeoutType::Wait))) | Err(_) => {
                tracing::trace!(lock = %name, "no free redis connection, treating as contended");
                return Ok(false);
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        let budget = remaining();
        let reply = if budget < self.command_timeout {
            match tokio::time::timeout(budget, set_nx(&mut conn, name, token, lease_ms)).await {
                Ok(reply) => reply?,
                // The caller's wait ran out first; Redis itself may be fine.
                Err(_) => return Ok(false),
            }
        } else {
            bounded(self.command_timeout, set_nx(&mut conn, name, token, lease_ms)).await?
        };
        Ok(reply.is_some())
    }

    fn start_watchdog(&self, lease: &LockLease) {
        let pool = self.pool.clone();
        let name = lease.name().to_string();
        let token = lease.token().to_string();
        let lease_ms = self.lease_ms();
        let period = (self.lease / 3).max(Duration::from_millis(10));
        let command_timeout = self.command_timeout;
        let watchdogs = Arc::clone(&self.watchdogs);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                // The map entry must exist before this task can remove it.
                if registered_rx.await.is_err() {
                    return;
                }
                loop {
                    sleep(period).await;
                    let renewal = renew(&pool, &name, &token, lease_ms);
                    match bounded(command_timeout, renewal).await {
                        Ok(true) => tracing::trace!(lock = %name, "lock lease renewed"),
                        Ok(false) => {
                            tracing::debug!(lock = %name, "lock no longer held, watchdog stopping");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(lock = %name, error = %e, "failed to renew lock lease");
                        }
                    }
                }
                watchdogs.remove(&token);
            }
        });

        self.watchdogs.insert(token, handle);
        let _ = registered_tx.send(());
    }
}

/// Await `op`, failing with [`LockError::Unavailable`] once `limit` elapses.
async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, LockError>
where
    F: Future<Output = Result<T, LockError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(LockError::Unavailable(format!(
            "no reply from redis within {}ms",
            limit.as_millis()
        ))),
    }
}

async fn set_nx(
    conn: &mut deadpool_redis::Connection,
    name: &str,
    token: &str,
    lease_ms: u64,
) -> Result<Option<String>, LockError> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(name)
        .arg(token)
        .arg("NX")
        .arg("PX")
        .arg(lease_ms)
        .query_async(conn)
        .await?;
    Ok(reply)
}

async fn renew(pool: &Pool, name: &str, token: &str, lease_ms: u64) -> Result<bool, LockError> {
    let mut conn = pool.get().await?;
    let renewed: i64 = RENEW_SCRIPT
        .key(name)
        .arg(token)
        .arg(lease_ms)
        .invoke_async(&mut conn)
        .await?;
    Ok(renewed == 1)
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let deadline = Instant::now() + wait;
        let token = Uuid::new_v4().to_string();
        let lease_ms = self.lease_ms();

        loop {
            if self.set_if_absent(name, &token, lease_ms, deadline).await? {
                let lease = LockLease::new(name, token);
                if self.watchdog {
                    self.start_watchdog(&lease);
                }
                tracing::trace!(lock = %name, "lock acquired");
                return Ok(Some(lease));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        if let Some((_, handle)) = self.watchdogs.remove(lease.token()) {
            handle.abort();
        }

        let deleted: i64 = bounded(self.command_timeout, async {
            let mut conn = self.pool.get().await?;
            let deleted: i64 = RELEASE_SCRIPT
                .key(lease.name())
                .arg(lease.token())
                .invoke_async(&mut conn)
                .await?;
            Ok(deleted)
        })
        .await?;

        if deleted == 0 {
            tracing::debug!(lock = %lease.name(), "lock had already expired or changed hands");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl Drop for RedisLock {
    fn drop(&mut self) {
        for entry in self.watchdogs.iter() {
            entry.value().abort();
        }
    }
}
