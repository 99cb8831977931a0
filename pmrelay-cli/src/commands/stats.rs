// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `pmrelay stats` command - One-shot host statistics.
//!
//! Shows what system-channel viewers receive. Live relay statistics are
//! served by a running relay at `/api/stats` and `/metrics`.

use pmrelay_core::{HostProbe, SystemProbe};

pub async fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let stats = HostProbe::new().system_stats().await?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                       HOST STATISTICS                        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Hostname:  {}", stats.hostname);
    println!(
        "  Platform:  {} {} ({})",
        stats.platform, stats.release, stats.arch
    );
    println!("  Uptime:    {}s", stats.uptime_secs);
    println!("  CPUs:      {} ({:.1}% busy)", stats.cpu_count, stats.cpu_percent);
    println!(
        "  Memory:    {} / {} MiB free ({}% used)",
        stats.memory.free / (1024 * 1024),
        stats.memory.total / (1024 * 1024),
        stats.memory.percentage
    );
    println!();
    println!("For live relay statistics, query a running relay:");
    println!("  curl http://localhost:8088/api/stats");

    Ok(())
}
