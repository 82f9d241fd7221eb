use anyhow::Result;
use colored::Colorize;
use tiercache::TierCacheConfig;

use crate::output::print_value;

pub fn show(config: &TierCacheConfig) -> Result<()> {
    println!(
        "{}: {}",
        "Instance".cyan(),
        config
            .instance_id
            .as_deref()
            .unwrap_or("(generated on start)")
    );
    println!(
        "{}: {}",
        "Shared layer".cyan(),
        if config.redis.enabled {
            config.redis.url.as_str()
        } else {
            "in-process"
        }
    );
    print_value(&serde_json::to_value(config)?);
    Ok(())
}
