use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tiercache")]
#[command(about = "tiercache CLI: read, write and watch two-tier caches")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to tiercache.toml when present)
    #[arg(short, long, global = true, env = "TIERCACHE_CONFIG")]
    pub config: Option<String>,

    /// Instance id (overrides the configured one)
    #[arg(short, long, global = true, env = "TIERCACHE_INSTANCE_ID")]
    pub instance: Option<String>,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    pub metrics: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a key (L1, then L2)
    Get(KeyArgs),
    /// Write a JSON value through both layers
    Put(PutArgs),
    /// Remove a key from both layers and notify other instances
    Evict(KeyArgs),
    /// Remove every entry of a cache and notify other instances
    Clear(CacheArgs),
    /// Read a key, running a synthetic loader on a miss under the single-flight lock
    Load(LoadArgs),
    /// Listen for invalidation events of a cache until Ctrl-C, following logging.level changes in the config file
    Watch(WatchArgs),
    /// Show the resolved configuration
    Config,
}

#[derive(clap::Args)]
pub struct CacheArgs {
    /// Cache name (e.g. character)
    pub cache: String,
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Cache name (e.g. character)
    pub cache: String,
    /// Entry key
    pub key: String,
}

#[derive(clap::Args)]
pub struct PutArgs {
    /// Cache name (e.g. character)
    pub cache: String,
    /// Entry key
    pub key: String,
    /// Value as JSON (e.g. '{"name":"hero","level":10}')
    pub value: String,
}

#[derive(clap::Args)]
pub struct LoadArgs {
    /// Cache name (e.g. character)
    pub cache: String,
    /// Entry key
    pub key: String,
    /// JSON value the loader produces
    #[arg(long, default_value = "null")]
    pub value: String,
    /// Time the loader takes, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,
}

#[derive(clap::Args)]
pub struct WatchArgs {
    /// Cache name (e.g. character)
    pub cache: String,
    /// Seconds between statistics lines
    #[arg(long, default_value_t = 5)]
    pub interval: u64,
}
