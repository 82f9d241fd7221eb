use colored::Colorize;
use serde_json::Value;
use tiercache::{CacheStats, InvalidationStats};

pub fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_cache_stats(name: &str, stats: &CacheStats) {
    println!(
        "{} {}: l1_hits={} l2_hits={} misses={} hit_rate={:.2} lock_timeouts={} lock_unavailable={} l2_failures={}",
        "Cache".cyan(),
        name,
        stats.l1_hits,
        stats.l2_hits,
        stats.misses,
        stats.hit_rate(),
        stats.lock_timeouts,
        stats.lock_unavailable,
        stats.l2_failures,
    );
}

pub fn print_invalidation_stats(stats: &InvalidationStats) {
    println!(
        "{}: published={} publish_failures={} evict={} clear_all={} skipped_self={} skipped_unknown={} skipped_invalid={} lagged={}",
        "Invalidation".cyan(),
        stats.published,
        stats.publish_failures,
        stats.received_evict,
        stats.received_clear_all,
        stats.skipped_self,
        stats.skipped_unknown_cache,
        stats.skipped_invalid,
        stats.lagged,
    );
}
