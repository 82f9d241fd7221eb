use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierCacheConfig {
    /// Identity of this process in invalidation events.
    /// Default: `<hostname>-<8 hex chars>`, regenerated on every start.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    /// Spec for caches without an entry in `caches`.
    #[serde(default)]
    pub defaults: CacheSpec,
    /// Per-cache overrides, keyed by cache name.
    #[serde(default)]
    pub caches: HashMap<String, CacheSpec>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TierCacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self
            .instance_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err("instance_id must not be blank".into());
        }
        // Redis validations
        if self.redis.enabled {
            if self.redis.url.is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.timeout_ms == 0 {
                return Err("redis.timeout_ms must be > 0".into());
            }
        }
        // Lock validations
        if self.lock.wait_ms == 0 {
            return Err("lock.wait_ms must be > 0".into());
        }
        if self.lock.retry_interval_ms == 0 {
            return Err("lock.retry_interval_ms must be > 0".into());
        }
        if self.lock.lease_ms <= self.lock.retry_interval_ms {
            return Err("lock.lease_ms must be > lock.retry_interval_ms".into());
        }
        if self.lock.key_prefix.is_empty() {
            return Err("lock.key_prefix must not be empty".into());
        }
        // Invalidation validations
        if self.invalidation.topic_prefix.is_empty() {
            return Err("invalidation.topic_prefix must not be empty".into());
        }
        if self.invalidation.reconnect_max_backoff_secs == 0 {
            return Err("invalidation.reconnect_max_backoff_secs must be > 0".into());
        }
        // Cache specs
        self.defaults.validate("defaults")?;
        for (name, spec) in &self.caches {
            spec.validate(&format!("caches.{name}"))?;
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Spec of the cache named `name`, falling back to `defaults`.
    pub fn spec_for(&self, name: &str) -> &CacheSpec {
        self.caches.get(name).unwrap_or(&self.defaults)
    }

    /// Configured instance id, or a freshly generated one.
    pub fn resolve_instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(default_instance_id)
    }
}

/// `<hostname>-<8 hex chars>`; unique per process start.
pub fn default_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "tiercache".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

/// Redis connection used for L2, the lock service and pub/sub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades to in-process layers without it)
    /// Default: false
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection and per-operation timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Single-flight lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Longest a loader waits for the lock before loading uncoordinated.
    #[serde(default = "default_lock_wait_ms")]
    pub wait_ms: u64,

    /// Lease of a held Redis lock; bounds how long a crashed holder blocks others.
    #[serde(default = "default_lock_lease_ms")]
    pub lease_ms: u64,

    /// Renew the lease while held.
    #[serde(default = "default_lock_watchdog")]
    pub watchdog: bool,

    #[serde(default = "default_lock_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_lock_key_prefix")]
    pub key_prefix: String,
}

fn default_lock_wait_ms() -> u64 {
    5000
}

fn default_lock_lease_ms() -> u64 {
    30_000
}

fn default_lock_watchdog() -> bool {
    true
}

fn default_lock_retry_interval_ms() -> u64 {
    50
}

fn default_lock_key_prefix() -> String {
    "cache:sf".to_string()
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_lock_wait_ms(),
            lease_ms: default_lock_lease_ms(),
            watchdog: default_lock_watchdog(),
            retry_interval_ms: default_lock_retry_interval_ms(),
            key_prefix: default_lock_key_prefix(),
        }
    }
}

impl LockConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Publish and subscribe to invalidation events
    #[serde(default = "default_invalidation_enabled")]
    pub enabled: bool,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Cap of the subscriber's reconnect backoff
    #[serde(default = "default_reconnect_max_backoff_secs")]
    pub reconnect_max_backoff_secs: u64,
}

fn default_invalidation_enabled() -> bool {
    true
}

fn default_topic_prefix() -> String {
    "cache:invalidation".to_string()
}

fn default_reconnect_max_backoff_secs() -> u64 {
    300
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_invalidation_enabled(),
            topic_prefix: default_topic_prefix(),
            reconnect_max_backoff_secs: default_reconnect_max_backoff_secs(),
        }
    }
}

/// TTLs and capacity of one cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    #[serde(default = "default_l1_ttl_secs")]
    pub l1_ttl_secs: u64,

    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: u64,

    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,
}

fn default_l1_ttl_secs() -> u64 {
    300
}

fn default_l1_max_entries() -> u64 {
    1000
}

fn default_l2_ttl_secs() -> u64 {
    900
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self {
            l1_ttl_secs: default_l1_ttl_secs(),
            l1_max_entries: default_l1_max_entries(),
            l2_ttl_secs: default_l2_ttl_secs(),
        }
    }
}

impl CacheSpec {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }

    fn validate(&self, path: &str) -> Result<(), String> {
        if self.l1_ttl_secs == 0 || self.l2_ttl_secs == 0 {
            return Err(format!("{path}: TTLs must be > 0"));
        }
        if self.l1_max_entries == 0 {
            return Err(format!("{path}.l1_max_entries must be > 0"));
        }
        // An L1 copy must not outlive the L2 entry it was read from.
        if self.l1_ttl_secs > self.l2_ttl_secs {
            return Err(format!("{path}.l1_ttl_secs must be <= {path}.l2_ttl_secs"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::TierCacheConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "tiercache.toml";

    pub fn load_config(path: Option<&str>) -> Result<TierCacheConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            tracing::warn!(path = %pathbuf.display(), "config file not found, using defaults");
        }
        // Environment variable overrides, e.g., TIERCACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: TierCacheConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<TierCacheConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
