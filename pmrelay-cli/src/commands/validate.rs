// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `pmrelay validate` command - Validate configuration file.

use pmrelay_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Daemon:");
            println!("  Home:         {}", config.daemon.home.display());
            println!("  RPC Socket:   {}", config.daemon.rpc_socket.display());
            println!("  PUB Socket:   {}", config.daemon.pub_socket.display());
            println!("  Binary:       {}", config.daemon.binary);
            println!(
                "  Event Poll:   {}ms",
                config.daemon.event_poll_interval.as_millis()
            );
            println!();
            println!("Monitor:");
            println!(
                "  Refresh:      {}ms",
                config.monitor.refresh_interval.as_millis()
            );
            println!(
                "  Usage:        {}ms (re-query every {} ticks)",
                config.monitor.usage_interval.as_millis(),
                config.monitor.usage_requery_every
            );
            println!("  Debounce:     {}ms", config.monitor.debounce.as_millis());
            println!(
                "  Idle Grace:   {}ms (swept every {}ms)",
                config.monitor.idle_grace.as_millis(),
                config.monitor.sweep_interval.as_millis()
            );
            println!("  Log Lines:    {}", config.monitor.log_tail_lines);
            println!("  Readonly:     {}", config.monitor.readonly);
            println!("  Max Restarts: {}", config.monitor.max_restarts);
            println!();
            println!("Server:");
            println!("  Port:         {}", config.server.port);
            println!(
                "  Auth Gate:    {}",
                if config.server.authorization.is_some() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!("  Log Level:    {}", config.log.level);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
