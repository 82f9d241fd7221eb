//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up a Redis instance and need a Docker
//! daemon, so they are ignored by default: `cargo test -- --ignored`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Character, eventually, l1};
use futures_util::StreamExt;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache::{
    BroadcastChannel, DistributedLock, MemoryStore, RedisBroadcast, RedisConfig, RedisLock,
    RedisSharedCache, SharedCache, TierCacheConfig, TieredCache, TieredCacheManager, redis_pool,
};
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

fn redis_config(url: String) -> RedisConfig {
    RedisConfig {
        enabled: true,
        url,
        pool_size: 8,
        timeout_ms: 2000,
    }
}

async fn pool() -> deadpool_redis::Pool {
    redis_pool::connect(&redis_config(get_redis_url().await))
        .await
        .expect("connect to redis")
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_shared_cache_roundtrip_and_scoped_clear() {
    let pool = pool().await;
    let timeout = Duration::from_secs(2);
    let characters = RedisSharedCache::new(pool.clone(), "rc-character", Duration::from_secs(60), timeout);
    let equipment = RedisSharedCache::new(pool, "rc-equipment", Duration::from_secs(60), timeout);

    characters.put("a", b"1".to_vec()).await.unwrap();
    characters.put("b", b"2".to_vec()).await.unwrap();
    equipment.put("a", b"x".to_vec()).await.unwrap();
    assert_eq!(characters.get("a").await.unwrap(), Some(b"1".to_vec()));

    characters.evict("a").await.unwrap();
    assert_eq!(characters.get("a").await.unwrap(), None);

    characters.clear().await.unwrap();
    assert_eq!(characters.get("b").await.unwrap(), None);
    assert_eq!(equipment.get("a").await.unwrap(), Some(b"x".to_vec()));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_clear_with_glob_and_separator_in_name_is_scoped() {
    let pool = pool().await;
    let timeout = Duration::from_secs(2);
    let ttl = Duration::from_secs(60);
    let shop = RedisSharedCache::new(pool.clone(), "rc-sh*p", ttl, timeout);
    let shop_eu = RedisSharedCache::new(pool.clone(), "rc-sh*p::eu", ttl, timeout);
    let plain = RedisSharedCache::new(pool, "rc-shop", ttl, timeout);

    shop.put("eu::item", b"1".to_vec()).await.unwrap();
    shop_eu.put("item", b"2".to_vec()).await.unwrap();
    plain.put("item", b"3".to_vec()).await.unwrap();
    assert_eq!(shop_eu.get("item").await.unwrap(), Some(b"2".to_vec()));

    shop.clear().await.unwrap();

    assert_eq!(shop.get("eu::item").await.unwrap(), None);
    assert_eq!(shop_eu.get("item").await.unwrap(), Some(b"2".to_vec()));
    assert_eq!(plain.get("item").await.unwrap(), Some(b"3".to_vec()));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_lock_is_exclusive_until_released() {
    let lock = RedisLock::new(pool().await).with_lease(Duration::from_secs(5));

    let lease = lock
        .try_acquire("rc:lock:exclusive", Duration::from_millis(100))
        .await
        .unwrap()
        .expect("first acquire");
    let contender = lock
        .try_acquire("rc:lock:exclusive", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(contender.is_none());

    lock.release(&lease).await.unwrap();
    let after = lock
        .try_acquire("rc:lock:exclusive", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(after.is_some());
    lock.release(&after.unwrap()).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_lock_release_requires_own_token() {
    let lock = RedisLock::new(pool().await).with_watchdog(false);
    let lease = lock
        .try_acquire("rc:lock:token", Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    let forged = tiercache::LockLease::new("rc:lock:token", "not-the-holder");
    lock.release(&forged).await.unwrap();

    let contender = lock
        .try_acquire("rc:lock:token", Duration::from_millis(100))
        .await
        .unwrap();
    assert!(contender.is_none(), "a foreign token must not release the lock");
    lock.release(&lease).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_watchdog_keeps_lease_alive() {
    let pool = pool().await;
    let holder = RedisLock::new(pool.clone()).with_lease(Duration::from_millis(300));
    let other = RedisLock::new(pool).with_watchdog(false);

    let lease = holder
        .try_acquire("rc:lock:watchdog", Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    // Well past the lease; only renewal keeps it held.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let contender = other
        .try_acquire("rc:lock:watchdog", Duration::from_millis(50))
        .await
        .unwrap();
    assert!(contender.is_none());

    holder.release(&lease).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_lease_expires_without_watchdog() {
    let lock = RedisLock::new(pool().await)
        .with_lease(Duration::from_millis(200))
        .with_watchdog(false);

    let _lease = lock
        .try_acquire("rc:lock:expiry", Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    let after_expiry = lock
        .try_acquire("rc:lock:expiry", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(after_expiry.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires docker"]
async fn test_lock_waiters_beyond_pool_size_load_once() {
    let small_pool = redis_pool::connect(&RedisConfig {
        pool_size: 2,
        ..redis_config(get_redis_url().await)
    })
    .await
    .unwrap();
    let lock = RedisLock::new(small_pool).with_watchdog(false);
    let store = MemoryStore::new();
    let cache = Arc::new(
        TieredCache::<Character>::builder(
            l1("rc-small-pool"),
            Arc::new(store.cache("rc-small-pool", Duration::from_secs(60))) as Arc<dyn SharedCache>,
        )
        .with_lock(Arc::new(lock) as Arc<dyn DistributedLock>)
        .with_lock_wait(Duration::from_secs(5))
        .build(),
    );
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load("user-1", || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, String>(Character::new("hero", 10))
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Character::new("hero", 10));
    }

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(cache.stats().lock_unavailable, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_broadcast_delivers_to_subscribers() {
    let url = get_redis_url().await;
    let pool = redis_pool::connect(&redis_config(url.clone())).await.unwrap();
    let channel = RedisBroadcast::new(pool, url);

    let mut stream = channel.subscribe("rc:topic").await.unwrap();
    let receivers = channel.publish("rc:topic", "hello").await.unwrap();
    assert_eq!(receivers, 1);

    let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, "hello");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_two_instances_over_redis() {
    let url = get_redis_url().await;
    let config = |id: &str| TierCacheConfig {
        instance_id: Some(id.to_string()),
        redis: redis_config(url.clone()),
        ..Default::default()
    };
    let a = TieredCacheManager::connect(config("node-a")).await;
    let b = TieredCacheManager::connect(config("node-b")).await;
    assert_eq!(a.backend_name(), "redis");

    let on_a = a.cache::<Character>("rc-two-instances").await.unwrap();
    let on_b = b.cache::<Character>("rc-two-instances").await.unwrap();

    on_a.put("user-1", Character::new("hero", 10)).await;
    assert!(eventually(|| b.invalidation_stats().received_evict >= 1).await);
    assert_eq!(on_b.get("user-1").await.map(|c| c.level), Some(10));

    on_a.put("user-1", Character::new("hero", 11)).await;
    assert!(eventually(|| on_b.local().get("user-1").is_none()).await);
    assert_eq!(on_b.get("user-1").await.map(|c| c.level), Some(11));

    let loaded = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut handles = Vec::new();
    for cache in [Arc::clone(&on_a), Arc::clone(&on_b), on_a, on_b] {
        let loaded = Arc::clone(&loaded);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load("user-2", || async move {
                    loaded.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(Character::new("mage", 20))
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().level, 20);
    }
    assert_eq!(loaded.load(std::sync::atomic::Ordering::SeqCst), 1);

    a.shutdown().await;
    b.shutdown().await;
}
