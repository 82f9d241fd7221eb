//! Log output for the cache engine and its CLI.
//!
//! The configured level applies to the `tiercache` crates. Redis, pool and
//! runtime internals stay at `warn` unless the level is stricter than that,
//! so `debug` shows cache decisions without driver chatter. `RUST_LOG`
//! replaces the whole filter when set.
//!
//! The filter sits behind a reload layer: [`set_log_level`] swaps it on a
//! running process, e.g. when a long-lived `watch` sees its config change.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

const OWN_TARGETS: [&str; 2] = ["tiercache", "tiercache_cli"];

/// Filter directives for `level`, e.g. `warn,tiercache=debug,tiercache_cli=debug`.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let others = match level.as_str() {
        "trace" | "debug" | "info" => "warn",
        stricter => stricter,
    };

    let mut directives = others.to_string();
    for target in OWN_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(&level);
    }
    directives
}

/// Install the global subscriber. Later calls keep the first subscriber.
pub fn init_tracing_with_level(level: &str) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::try_from_default_env().ok(),
        Err(_) => None,
    }
    .unwrap_or_else(|| EnvFilter::new(filter_directives(level)));

    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Switch the running subscriber to `level`.
///
/// Returns `false` when no subscriber was installed by
/// [`init_tracing_with_level`] or the swap failed.
pub fn set_log_level(level: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    match handle.modify(|filter| *filter = EnvFilter::new(filter_directives(level))) {
        Ok(()) => {
            tracing::info!(level, "log level changed");
            true
        }
        Err(e) => {
            tracing::warn!(level, error = %e, "failed to change log level");
            false
        }
    }
}
