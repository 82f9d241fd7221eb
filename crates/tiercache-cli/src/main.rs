mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tiercache::config::loader;
use tiercache::{TieredCacheManager, init_tracing_with_level, metrics};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config =
        loader::load_config_with_default_path(cli.config.as_deref()).map_err(anyhow::Error::msg)?;
    if let Some(instance) = &cli.instance {
        config.instance_id = Some(instance.clone());
    }

    if let Commands::Config = &cli.command {
        return commands::config::show(&config);
    }

    init_tracing_with_level(&config.logging.level);
    let log_level = config.logging.level.clone();
    if cli.metrics {
        metrics::init_metrics();
    }

    let manager = TieredCacheManager::connect(config).await;
    tracing::debug!(
        instance_id = %manager.instance_id(),
        backend = manager.backend_name(),
        lock = manager.lock_backend_name(),
        "cache manager ready"
    );

    let outcome = match &cli.command {
        Commands::Get(args) => commands::cache::get(&manager, &args.cache, &args.key).await,
        Commands::Put(args) => commands::cache::put(&manager, args).await,
        Commands::Evict(args) => commands::cache::evict(&manager, &args.cache, &args.key).await,
        Commands::Clear(args) => commands::cache::clear(&manager, &args.cache).await,
        Commands::Load(args) => commands::cache::load(&manager, args).await,
        Commands::Watch(args) => {
            commands::cache::watch(&manager, args, cli.config.as_deref(), log_level).await
        }
        Commands::Config => Ok(()),
    };

    manager.shutdown().await;
    if cli.metrics {
        if let Some(text) = metrics::render_metrics() {
            print!("{text}");
        }
    }
    outcome
}
