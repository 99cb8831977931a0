// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `pmrelay list` command - One-shot process table from the daemon.

use std::path::Path;

use pmrelay_core::{
    ConfigLoader, ConfigOverrides, Pm2Client, ProcessRecord, SupervisorClient,
};

pub async fn execute(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load(config_path.map(Path::new), &ConfigOverrides::default())?;
    let client = Pm2Client::new(&config.daemon);

    let processes: Vec<ProcessRecord> = client
        .list_processes()
        .await?
        .into_iter()
        .map(ProcessRecord::normalize)
        .collect();

    if processes.is_empty() {
        println!("No PM2 process is running.");
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                               PM2 PROCESSES                                  ║");
    println!("╠══════╦═══════════════════════╦════════════╦═════════╦══════════╦═════════════╣");
    println!("║ ID   ║ Name                  ║ Status     ║ PID     ║ Restarts ║ Owner       ║");
    println!("╠══════╬═══════════════════════╬════════════╬═════════╬══════════╬═════════════╣");

    for process in &processes {
        println!(
            "║ {:<4} ║ {:<21} ║ {:<10} ║ {:<7} ║ {:<8} ║ {:<11} ║",
            process.process_id.to_string(),
            truncate(&process.name, 21),
            process.status.to_string(),
            process
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            process.restart_count,
            truncate(&process.owner, 11)
        );
    }

    println!("╚══════╩═══════════════════════╩════════════╩═════════╩══════════╩═════════════╝");
    println!();
    println!("Total: {} process(es)", processes.len());

    Ok(())
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
