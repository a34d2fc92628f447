//! keel CLI
//!
//! Loads the layered configuration, installs logging, and drives one
//! fixed-capacity memory pool through the processing cycles.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

mod commands;
mod config;
mod logging;

use commands::{LayoutCommand, RunCommand};
use config::{AppConfig, LogFormat, Overrides};

/// keel - fixed-capacity memory pool driver
#[derive(Debug, Parser)]
#[command(name = "keel")]
#[command(version, about)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Pool size in MiB (overrides `core.memory_pool_size_mb`)
    #[arg(long, value_name = "N", global = true)]
    pool_size_mb: Option<u64>,

    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_name = "FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initialize the pool and run the processing cycles
    Run(RunCommand),

    /// Show how a short allocation script lays out blocks
    Layout(LayoutCommand),

    /// Print the resolved configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = Overrides {
        memory_pool_size_mb: cli.pool_size_mb,
        log_level: cli.log_level.clone(),
        log_format: cli.log_format,
    };
    let config = AppConfig::load(cli.config.as_deref(), &overrides)?;
    logging::init(&config.log)?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Run(command) => command.run(&config),
        Commands::Layout(command) => command.run(),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
