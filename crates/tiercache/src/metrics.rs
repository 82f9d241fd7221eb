//! Prometheus metrics for the tiered cache.
//!
//! Counters are registered once per cache name when a cache (or the
//! invalidation publisher/subscriber) is constructed. The hot path only
//! increments pre-resolved handles and never looks anything up by string.
//!
//! Every counter also keeps an in-process tally so that statistics are
//! available without a Prometheus recorder installed.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{Counter, counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Tiered cache
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_LOCK_FAILURES_TOTAL: &str = "cache_lock_failures_total";
    pub const CACHE_L2_FAILURES_TOTAL: &str = "cache_l2_failures_total";

    // Invalidation
    pub const INVALIDATION_PUBLISHED_TOTAL: &str = "cache_invalidation_published_total";
    pub const INVALIDATION_RECEIVED_TOTAL: &str = "cache_invalidation_received_total";
    pub const INVALIDATION_SKIPPED_TOTAL: &str = "cache_invalidation_skipped_total";
    pub const INVALIDATION_LAGGED_TOTAL: &str = "cache_invalidation_lagged_total";
}

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
/// Counters registered before this call are not exported.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// A registered counter paired with a local tally.
struct Tally {
    counter: Counter,
    value: AtomicU64,
}

impl Tally {
    fn new(counter: Counter) -> Self {
        Self {
            counter,
            value: AtomicU64::new(0),
        }
    }

    #[inline]
    fn increment(&self) {
        self.counter.increment(1);
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Shared-layer operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedOp {
    Get,
    Put,
    Evict,
    Clear,
}

impl SharedOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Evict => "evict",
            Self::Clear => "clear",
        }
    }
}

/// Why single-flight coordination was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    /// Another holder kept the lock for the whole wait.
    Timeout,
    /// The lock service could not be reached.
    Unavailable,
}

/// Counters of one cache name.
pub struct CacheCounters {
    l1_hits: Tally,
    l2_hits: Tally,
    misses: Tally,
    lock_timeouts: Tally,
    lock_unavailable: Tally,
    l2_get_failures: Tally,
    l2_put_failures: Tally,
    l2_evict_failures: Tally,
    l2_clear_failures: Tally,
}

impl CacheCounters {
    pub fn new(cache: &str) -> Self {
        let cache = cache.to_string();
        let l2_failure = |op: SharedOp| {
            Tally::new(counter!(
                names::CACHE_L2_FAILURES_TOTAL,
                "cache" => cache.clone(),
                "op" => op.as_str()
            ))
        };

        Self {
            l1_hits: Tally::new(counter!(names::CACHE_HITS_TOTAL, "cache" => cache.clone(), "layer" => "L1")),
            l2_hits: Tally::new(counter!(names::CACHE_HITS_TOTAL, "cache" => cache.clone(), "layer" => "L2")),
            misses: Tally::new(counter!(names::CACHE_MISSES_TOTAL, "cache" => cache.clone())),
            lock_timeouts: Tally::new(counter!(
                names::CACHE_LOCK_FAILURES_TOTAL,
                "cache" => cache.clone(),
                "reason" => "timeout"
            )),
            lock_unavailable: Tally::new(counter!(
                names::CACHE_LOCK_FAILURES_TOTAL,
                "cache" => cache.clone(),
                "reason" => "unavailable"
            )),
            l2_get_failures: l2_failure(SharedOp::Get),
            l2_put_failures: l2_failure(SharedOp::Put),
            l2_evict_failures: l2_failure(SharedOp::Evict),
            l2_clear_failures: l2_failure(SharedOp::Clear),
        }
    }

    #[inline]
    pub fn record_l1_hit(&self) {
        self.l1_hits.increment();
    }

    #[inline]
    pub fn record_l2_hit(&self) {
        self.l2_hits.increment();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.increment();
    }

    pub fn record_lock_failure(&self, reason: LockFailure) {
        match reason {
            LockFailure::Timeout => self.lock_timeouts.increment(),
            LockFailure::Unavailable => self.lock_unavailable.increment(),
        }
    }

    pub fn record_l2_failure(&self, op: SharedOp) {
        match op {
            SharedOp::Get => self.l2_get_failures.increment(),
            SharedOp::Put => self.l2_put_failures.increment(),
            SharedOp::Evict => self.l2_evict_failures.increment(),
            SharedOp::Clear => self.l2_clear_failures.increment(),
        }
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.l1_hits.get(),
            l2_hits: self.l2_hits.get(),
            misses: self.misses.get(),
            lock_timeouts: self.lock_timeouts.get(),
            lock_unavailable: self.lock_unavailable.get(),
            l2_failures: self.l2_get_failures.get()
                + self.l2_put_failures.get()
                + self.l2_evict_failures.get()
                + self.l2_clear_failures.get(),
        }
    }
}

/// Point-in-time statistics of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub lock_timeouts: u64,
    pub lock_unavailable: u64,
    pub l2_failures: u64,
}

impl CacheStats {
    pub fn lock_failures(&self) -> u64 {
        self.lock_timeouts + self.lock_unavailable
    }

    /// Fraction of lookups served from either layer, or `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Counters of the invalidation publisher and subscriber.
pub struct InvalidationCounters {
    published: Tally,
    publish_failures: Tally,
    received_evict: Tally,
    received_clear_all: Tally,
    skipped_self: Tally,
    skipped_unknown_cache: Tally,
    skipped_invalid: Tally,
    lagged: Tally,
}

impl InvalidationCounters {
    pub fn new() -> Self {
        Self {
            published: Tally::new(counter!(names::INVALIDATION_PUBLISHED_TOTAL, "status" => "success")),
            publish_failures: Tally::new(counter!(names::INVALIDATION_PUBLISHED_TOTAL, "status" => "failure")),
            received_evict: Tally::new(counter!(names::INVALIDATION_RECEIVED_TOTAL, "type" => "EVICT")),
            received_clear_all: Tally::new(counter!(names::INVALIDATION_RECEIVED_TOTAL, "type" => "CLEAR_ALL")),
            skipped_self: Tally::new(counter!(names::INVALIDATION_SKIPPED_TOTAL, "reason" => "self")),
            skipped_unknown_cache: Tally::new(counter!(
                names::INVALIDATION_SKIPPED_TOTAL,
                "reason" => "unknown_cache"
            )),
            skipped_invalid: Tally::new(counter!(names::INVALIDATION_SKIPPED_TOTAL, "reason" => "invalid")),
            lagged: Tally::new(counter!(names::INVALIDATION_LAGGED_TOTAL)),
        }
    }

    pub fn record_published(&self) {
        self.published.increment();
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.increment();
    }

    pub fn record_received_evict(&self) {
        self.received_evict.increment();
    }

    pub fn record_received_clear_all(&self) {
        self.received_clear_all.increment();
    }

    pub fn record_skipped_self(&self) {
        self.skipped_self.increment();
    }

    pub fn record_skipped_unknown_cache(&self) {
        self.skipped_unknown_cache.increment();
    }

    pub fn record_skipped_invalid(&self) {
        self.skipped_invalid.increment();
    }

    /// A listener fell behind and lost events; its L1 was cleared instead.
    pub fn record_lagged(&self) {
        self.lagged.increment();
    }

    pub fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            published: self.published.get(),
            publish_failures: self.publish_failures.get(),
            received_evict: self.received_evict.get(),
            received_clear_all: self.received_clear_all.get(),
            skipped_self: self.skipped_self.get(),
            skipped_unknown_cache: self.skipped_unknown_cache.get(),
            skipped_invalid: self.skipped_invalid.get(),
            lagged: self.lagged.get(),
        }
    }
}

impl Default for InvalidationCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct InvalidationStats {
    pub published: u64,
    pub publish_failures: u64,
    pub received_evict: u64,
    pub received_clear_all: u64,
    pub skipped_self: u64,
    pub skipped_unknown_cache: u64,
    pub skipped_invalid: u64,
    pub lagged: u64,
}
