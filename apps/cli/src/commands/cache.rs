//! Cache command implementation.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::time::Duration;
use strata_core::cache::CacheStats;
use strata_core::models::BuilderRegistry;
use strata_core::{Engine, StrataConfig};
use tracing::debug;

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the value stored under a key
    Get {
        /// Cache key
        key: String,
    },
    /// Store a value under a key
    Set {
        /// Cache key
        key: String,
        /// Value to store
        value: String,
        /// Time-to-live in seconds (defaults to [cache] default_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Remove a key from every tier
    Delete {
        /// Cache key
        key: String,
    },
    /// Remove every entry from every tier
    Clear,
    /// Show cache statistics for this invocation
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute a cache command against a freshly started engine.
pub async fn execute(command: CacheCommand, config: StrataConfig) -> Result<()> {
    let engine = Engine::start(config, BuilderRegistry::new())
        .await
        .context("Failed to start engine")?;
    let result = run(&engine, command).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &Engine, command: CacheCommand) -> Result<()> {
    let cache = engine.cache();
    if !cache.remote_enabled() && !cache.disk_enabled() {
        debug!("No persistent cache tier enabled; values will not outlive this process");
    }

    match command {
        CacheCommand::Get { key } => {
            let Some(value) = cache.get(&key).await else {
                bail!("Key '{}' not found", key);
            };
            println!("{}", String::from_utf8_lossy(&value));
        }
        CacheCommand::Set { key, value, ttl } => {
            let ttl = ttl.map_or_else(|| engine.config().cache.default_ttl(), Duration::from_secs);
            if cache.set(&key, value.into_bytes().into(), ttl).await {
                println!("{} Stored '{}' (ttl {}s)", "✓".green(), key, ttl.as_secs());
            } else {
                bail!("Failed to store '{}' in every tier", key);
            }
        }
        CacheCommand::Delete { key } => {
            if cache.delete(&key).await {
                println!("{} Deleted '{}'", "✓".green(), key);
            } else {
                bail!("Failed to delete '{}' from every tier", key);
            }
        }
        CacheCommand::Clear => {
            if cache.clear().await {
                println!("{} Cache cleared", "✓".green());
            } else {
                bail!("Failed to clear every tier");
            }
        }
        CacheCommand::Stats { json } => {
            let stats = cache.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats, cache.remote_enabled(), cache.disk_enabled());
            }
        }
    }
    Ok(())
}

fn print_stats(stats: &CacheStats, remote: bool, disk: bool) {
    let on_off = |enabled: bool| if enabled { "enabled".green() } else { "disabled".dimmed() };

    println!("{}", "Cache Statistics".bold().cyan());
    println!("  Hits:         {}", stats.hits);
    println!("  Misses:       {}", stats.misses);
    println!("  Hit rate:     {:.1}%", stats.hit_rate() * 100.0);
    println!("  Sets:         {}", stats.sets);
    println!("  Deletes:      {}", stats.deletes);
    println!("  Evictions:    {}", stats.evictions);
    println!("  Memory items: {}", stats.memory_items);
    println!("  Memory bytes: {}", stats.memory_bytes);
    println!("  Remote tier:  {}", on_off(remote));
    println!("  Disk tier:    {}", on_off(disk));
}
