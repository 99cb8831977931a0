// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Host system statistics and per-process resource sampling.
//!
//! `SystemProbe` is the seam the monitor samples through; `HostProbe` is the
//! sysinfo-backed implementation used in production.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::error::ProbeError;

/// Window over which aggregate CPU usage is measured.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Host memory figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub free: u64,
    pub total: u64,
    /// Rounded used-memory percentage.
    pub percentage: u8,
}

impl MemoryStats {
    pub fn new(free: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            (100.0 * (1.0 - free as f64 / total as f64)).round().clamp(0.0, 100.0) as u8
        };
        Self {
            free,
            total,
            percentage,
        }
    }
}

/// Host-level snapshot, replaced wholesale on each heartbeat tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub release: String,
    pub uptime_secs: u64,
    pub cpu_count: usize,
    pub memory: MemoryStats,
    /// Aggregate CPU usage measured over `CPU_SAMPLE_WINDOW`.
    pub cpu_percent: f64,
}

/// One CPU/memory reading for a single system process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSample {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
}

/// Source of host statistics and per-process usage.
pub trait SystemProbe: Send + Sync + 'static {
    /// Sample host facts; CPU is measured across a fixed window.
    fn system_stats(&self) -> impl Future<Output = Result<SystemStats, ProbeError>> + Send;

    /// Sample CPU and memory of one operating-system process.
    fn process_usage(&self, pid: u32)
        -> impl Future<Output = Result<ProcessSample, ProbeError>> + Send;
}

/// sysinfo-backed probe of the local host.
pub struct HostProbe {
    host: Mutex<System>,
    processes: Mutex<System>,
    cpu_window: Duration,
}

impl HostProbe {
    pub fn new() -> Self {
        Self::with_cpu_window(CPU_SAMPLE_WINDOW)
    }

    pub fn with_cpu_window(cpu_window: Duration) -> Self {
        Self {
            host: Mutex::new(System::new()),
            processes: Mutex::new(System::new()),
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    fn lock(system: &Mutex<System>) -> Result<MutexGuard<'_, System>, ProbeError> {
        system.lock().map_err(|_| ProbeError::Unavailable {
            reason: "sampler state poisoned".to_string(),
        })
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    async fn system_stats(&self) -> Result<SystemStats, ProbeError> {
        // First reading; the guard must not live across the sleep.
        Self::lock(&self.host)?.refresh_cpu();

        tokio::time::sleep(self.cpu_window).await;

        let mut sys = Self::lock(&self.host)?;
        sys.refresh_cpu();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable {
                reason: "total memory reported as zero".to_string(),
            });
        }

        Ok(SystemStats {
            hostname: System::host_name().unwrap_or_default(),
            platform: std::env::consts::OS.to_string(),
            arch: System::cpu_arch().unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            release: System::kernel_version().unwrap_or_default(),
            uptime_secs: System::uptime(),
            cpu_count: sys.cpus().len(),
            memory: MemoryStats::new(sys.available_memory(), total),
            cpu_percent: round2(sys.global_cpu_info().cpu_usage() as f64),
        })
    }

    async fn process_usage(&self, pid: u32) -> Result<ProcessSample, ProbeError> {
        let mut sys = Self::lock(&self.processes)?;
        if sys.total_memory() == 0 {
            sys.refresh_memory();
        }

        let sys_pid = Pid::from_u32(pid);
        if !sys.refresh_process(sys_pid) {
            return Err(ProbeError::ProcessGone { pid });
        }
        let process = sys
            .process(sys_pid)
            .ok_or(ProbeError::ProcessGone { pid })?;

        let memory_bytes = process.memory();
        let total = sys.total_memory().max(1);
        Ok(ProcessSample {
            cpu_percent: round2(process.cpu_usage() as f64),
            memory_bytes,
            memory_percent: round2(memory_bytes as f64 * 100.0 / total as f64),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_percentage() {
        let memory = MemoryStats::new(250, 1000);
        assert_eq!(memory.percentage, 75);
        assert_eq!(MemoryStats::new(0, 0).percentage, 0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(0.0), 0.0);
    }

    #[tokio::test]
    async fn test_host_probe_samples_own_process() {
        let probe = HostProbe::new();
        let sample = probe.process_usage(std::process::id()).await.unwrap();
        assert!(sample.memory_bytes > 0);
        assert!(sample.memory_percent >= 0.0);
    }

    #[tokio::test]
    async fn test_host_probe_missing_process() {
        let probe = HostProbe::new();
        let result = probe.process_usage(u32::MAX - 1).await;
        assert!(matches!(result, Err(ProbeError::ProcessGone { .. })));
    }
}
