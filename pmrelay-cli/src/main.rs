// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! pmrelay CLI
//!
//! Command-line interface and websocket server for the pmrelay monitor.

use clap::{Parser, Subcommand};

use pmrelay_core::{ConfigLoader, ConfigOverrides};

mod commands;
mod metrics;
mod server;

/// pmrelay - Real-time relay between a PM2 daemon and dashboard viewers
#[derive(Parser)]
#[command(name = "pmrelay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server
    Serve {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Reject every control action
        #[arg(long)]
        readonly: bool,

        /// Shared secret viewers must pass as `?auth=`
        #[arg(long)]
        auth: Option<String>,

        /// Heartbeat period in milliseconds
        #[arg(long)]
        refresh_ms: Option<u64>,

        /// Usage sample period in milliseconds
        #[arg(long)]
        usage_ms: Option<u64>,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// List processes known to the daemon
    List,

    /// Show host statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        configured_level(cli.config.as_deref())
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve {
            port,
            readonly,
            auth,
            refresh_ms,
            usage_ms,
        } => {
            let overrides = ConfigOverrides {
                port,
                readonly,
                authorization: auth,
                refresh_interval_ms: refresh_ms,
                usage_interval_ms: usage_ms,
            };
            commands::serve::execute(config, overrides).await
        }
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::List => commands::list::execute(config).await,
        Commands::Stats => commands::stats::execute().await,
    }
}

/// Level from the config file, `info` when there is none or it is invalid.
/// The command itself reports configuration errors.
fn configured_level(config: Option<&str>) -> String {
    config
        .and_then(|path| ConfigLoader::load_file(path).ok())
        .map(|config| config.log.level)
        .unwrap_or_else(|| "info".to_string())
}
