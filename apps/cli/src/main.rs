//! Strata CLI - operate the tiered cache and inspect configuration.
//!
//! Each invocation starts with an empty memory tier, so cache commands
//! observe the remote and disk tiers configured for the workspace.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::{load_config, LoggingConfig};

use commands::cache::CacheCommand;

/// Strata - tiered caching and model lifecycle management
#[derive(Parser, Debug)]
#[command(name = "strata", author, version, about = "Strata - tiered caching and model lifecycle management")]
struct Args {
    /// Log level or filter directive (overrides [logging] level)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Workspace directory (overrides STRATA_WORKSPACE, defaults to the current directory)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved configuration as TOML
    Config,

    /// Cache operations
    #[command(subcommand)]
    Cache(CacheCommand),
}

fn resolve_workspace(arg: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os("STRATA_WORKSPACE") {
        return Ok(PathBuf::from(path));
    }
    std::env::current_dir().context("Failed to get current directory")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let workspace = resolve_workspace(args.workspace)?;
    let config = load_config(&workspace)
        .with_context(|| format!("Failed to load configuration from {}", workspace.display()))?;

    let logging = LoggingConfig {
        level: args.log_level.unwrap_or_else(|| config.logging.level.clone()),
        json: config.logging.json,
    };
    strata_core::init_tracing(&logging).context("Failed to initialize logging")?;

    match args.command {
        Command::Config => commands::config::execute(&config),
        Command::Cache(cmd) => commands::cache::execute(cmd, config).await,
    }
}
