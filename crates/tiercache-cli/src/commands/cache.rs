use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;
use tiercache::config::loader;
use tiercache::{LocalCache, TieredCache, TieredCacheManager, set_log_level};

use crate::cli::{LoadArgs, PutArgs, WatchArgs};
use crate::output::{print_cache_stats, print_invalidation_stats, print_success, print_value};

async fn open(manager: &TieredCacheManager, name: &str) -> Result<Arc<TieredCache<Value>>> {
    manager
        .cache::<Value>(name)
        .await
        .with_context(|| format!("Failed to open cache: {name}"))
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON value: {raw}"))
}

pub async fn get(manager: &TieredCacheManager, cache: &str, key: &str) -> Result<()> {
    let handle = open(manager, cache).await?;
    match handle.get(key).await {
        Some(value) => print_value(&value),
        None => println!("{} {cache}/{key}", "Not found:".yellow()),
    }
    Ok(())
}

pub async fn put(manager: &TieredCacheManager, args: &PutArgs) -> Result<()> {
    let value = parse_json(&args.value)?;
    let handle = open(manager, &args.cache).await?;
    handle.put(&args.key, value).await;

    // L1 only holds the value once L2 accepted it.
    if handle.local().get(&args.key).is_some() {
        print_success(&format!("Stored {}/{}", args.cache, args.key));
        Ok(())
    } else {
        anyhow::bail!(
            "Shared layer rejected {}/{}; nothing was stored",
            args.cache,
            args.key
        )
    }
}

pub async fn evict(manager: &TieredCacheManager, cache: &str, key: &str) -> Result<()> {
    open(manager, cache).await?.evict(key).await;
    print_success(&format!("Evicted {cache}/{key}"));
    Ok(())
}

pub async fn clear(manager: &TieredCacheManager, cache: &str) -> Result<()> {
    open(manager, cache).await?.clear().await;
    print_success(&format!("Cleared {cache}"));
    Ok(())
}

pub async fn load(manager: &TieredCacheManager, args: &LoadArgs) -> Result<()> {
    let produced = parse_json(&args.value)?;
    let handle = open(manager, &args.cache).await?;
    let delay = Duration::from_millis(args.delay_ms);
    let ran = AtomicBool::new(false);
    let ran_ref = &ran;

    let value = handle
        .get_or_load(&args.key, || async move {
            ran_ref.store(true, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(produced)
        })
        .await?;

    let source = if ran.load(Ordering::SeqCst) {
        "loader"
    } else {
        "cache"
    };
    println!("{}: {}", "Source".cyan(), source);
    print_value(&value);
    print_cache_stats(&args.cache, &handle.stats());
    Ok(())
}

/// Re-read the config file and apply `logging.level` when it changed.
///
/// A config that no longer loads or validates keeps the current level.
fn reload_log_level(config_path: Option<&str>, current: &mut String) {
    let level = match loader::load_config_with_default_path(config_path) {
        Ok(config) => config.logging.level,
        Err(e) => {
            tracing::warn!(error = %e, "config reload failed, keeping log level");
            return;
        }
    };
    if level.eq_ignore_ascii_case(current) {
        return;
    }
    if set_log_level(&level) {
        print_success(&format!("Log level now {level}"));
    }
    *current = level;
}

pub async fn watch(
    manager: &TieredCacheManager,
    args: &WatchArgs,
    config_path: Option<&str>,
    mut log_level: String,
) -> Result<()> {
    let handle = open(manager, &args.cache).await?;
    if manager.subscriber().is_none() {
        anyhow::bail!("Invalidation is disabled; nothing to watch");
    }

    println!(
        "{} {} as {} ({} backend), Ctrl-C to stop",
        "Watching".cyan(),
        args.cache,
        manager.instance_id(),
        manager.backend_name()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    let mut last = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                reload_log_level(config_path, &mut log_level);
                let stats = manager.invalidation_stats();
                if last != Some(stats) {
                    print_invalidation_stats(&stats);
                    print_cache_stats(&args.cache, &handle.stats());
                    last = Some(stats);
                }
            }
        }
    }

    print_success("Stopped watching");
    Ok(())
}
