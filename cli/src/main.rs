// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Trust Engine CLI
//!
//! The `aegis-trust` binary runs the trust engine daemon and manages its
//! configuration.
//!
//! ## Commands
//!
//! - `aegis-trust serve` - Run the HTTP API and background workers
//! - `aegis-trust config show|validate|generate` - Configuration management
//! - `aegis-trust keygen` - Print a fresh master key for sealing agent keys

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aegis_trust_core::domain::config::TrustEngineConfig;

mod commands;
mod daemon;

use commands::ConfigCommand;

/// AEGIS Trust Engine - capability enforcement and trust scoring for agents
#[derive(Parser)]
#[command(name = "aegis-trust")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AEGIS_TRUST_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trust engine daemon
    #[command(name = "serve")]
    Serve {
        /// HTTP API port (overrides spec.network.port)
        #[arg(long, env = "AEGIS_TRUST_PORT")]
        port: Option<u16>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate a base64 master key for spec.keys.master_key
    #[command(name = "keygen")]
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = TrustEngineConfig::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            if let Some(level) = cli.log_level {
                config.spec.observability.logging.level = level;
            }
            if let Some(port) = port {
                config.spec.network.port = port;
            }

            let logging = &config.spec.observability.logging;
            init_logging(&logging.level, &logging.format)?;
            daemon::run(config).await
        }
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::config::handle_command(command, cli.config).await
        }
        Commands::Keygen => commands::keygen::execute(),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // Audit records are told apart by target, so JSON output keeps it.
    match format {
        "json" => builder.json().with_target(true).init(),
        _ => builder.with_target(false).compact().init(),
    }

    Ok(())
}
