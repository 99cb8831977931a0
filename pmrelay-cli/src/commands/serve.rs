// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `pmrelay serve` command - Run the relay.
//!
//! Loads configuration, starts the monitor and serves viewers until Ctrl+C.

use std::path::Path;
use std::sync::Arc;

use pmrelay_core::{ConfigLoader, ConfigOverrides, HostProbe, Monitor, Pm2Client};

use crate::{metrics, server};

pub async fn execute(
    config_path: Option<&str>,
    overrides: ConfigOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = ?config_path, "Starting relay");

    // Fail fast on invalid configuration
    let config = ConfigLoader::load(config_path.map(Path::new), &overrides)?;
    tracing::info!(
        home = %config.daemon.home.display(),
        port = %config.server.port,
        readonly = config.monitor.readonly,
        auth = config.server.authorization.is_some(),
        "Configuration validated successfully"
    );

    let client = Pm2Client::new(&config.daemon);
    let monitor = Monitor::new(config.monitor.clone(), client, HostProbe::new());
    monitor.start();
    metrics::init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                        PMRELAY                               ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Daemon:    {}", config.daemon.home.display());
    println!("  Viewers:   ws://localhost:{}/ws/{{system|processes|log|usage}}", config.server.port);
    println!("  Stats:     http://localhost:{}/api/stats", config.server.port);
    println!("  Metrics:   http://localhost:{}/metrics", config.server.port);
    if config.monitor.readonly {
        println!("  Mode:      readonly");
    }
    println!();
    println!("Press Ctrl+C to stop...");

    let served = server::run(&config.server, Arc::clone(&monitor)).await;

    println!();
    println!("Shutting down...");
    monitor.shutdown();
    println!("Relay stopped.");

    served
}
