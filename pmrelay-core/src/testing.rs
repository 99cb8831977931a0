// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-memory supervisor and probe shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{ProbeError, SupervisorError, SupervisorResult};
use crate::process::{ProcessStatus, RawProcess, ResourceUsage};
use crate::supervisor::{LogPaths, SupervisorClient, SupervisorEvent};
use crate::system::{MemoryStats, ProcessSample, SystemProbe, SystemStats};
use crate::types::{ProcessAction, ProcessId};

pub fn raw_process(id: u32, status: ProcessStatus) -> RawProcess {
    RawProcess {
        process_id: ProcessId::new(id),
        name: format!("app-{}", id),
        pid: (status == ProcessStatus::Online).then_some(1000 + id),
        status,
        restart_count: 0,
        started_at: None,
        usage: ResourceUsage::default(),
        env: None,
    }
}

#[derive(Default)]
pub struct FakeSupervisor {
    processes: Mutex<Vec<RawProcess>>,
    unreachable: AtomicBool,
    failing: Mutex<HashSet<ProcessId>>,
    actions: Mutex<Vec<(ProcessAction, ProcessId)>>,
    list_calls: AtomicUsize,
    list_delay: Mutex<Option<Duration>>,
    lists_in_flight: AtomicUsize,
    max_lists_in_flight: AtomicUsize,
    events: Mutex<Option<mpsc::Sender<SupervisorEvent>>>,
}

impl FakeSupervisor {
    pub fn with_processes(processes: Vec<RawProcess>) -> Self {
        let fake = Self::default();
        fake.set_processes(processes);
        fake
    }

    pub fn set_processes(&self, processes: Vec<RawProcess>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_action_on(&self, id: u32) {
        self.failing.lock().unwrap().insert(ProcessId::new(id));
    }

    /// Make every `list_processes` call take `delay`.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn actions(&self) -> Vec<(ProcessAction, ProcessId)> {
        self.actions.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Most `list_processes` calls ever running at once.
    pub fn max_concurrent_lists(&self) -> usize {
        self.max_lists_in_flight.load(Ordering::SeqCst)
    }

    /// Whether an event subscription is currently held open.
    pub fn bus_open(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub async fn emit(&self, event: SupervisorEvent) {
        let sender = self.events.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

impl SupervisorClient for FakeSupervisor {
    async fn list_processes(&self) -> SupervisorResult<Vec<RawProcess>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            let running = self.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_lists_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SupervisorError::Unreachable {
                socket: "/tmp/pm2/rpc.sock".to_string(),
                reason: "connect ECONNREFUSED".to_string(),
            });
        }
        Ok(self.processes.lock().unwrap().clone())
    }

    async fn version(&self) -> SupervisorResult<String> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SupervisorError::Rpc {
                call: "getVersion",
                message: "timeout".to_string(),
            });
        }
        Ok("5.3.0".to_string())
    }

    async fn perform_action(&self, action: ProcessAction, id: ProcessId) -> SupervisorResult<()> {
        self.actions.lock().unwrap().push((action, id));
        if self.failing.lock().unwrap().contains(&id) {
            return Err(SupervisorError::Rpc {
                call: "deleteProcessId",
                message: format!("process {} is locked", id),
            });
        }
        Ok(())
    }

    async fn subscribe_events(&self) -> SupervisorResult<mpsc::Receiver<SupervisorEvent>> {
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn log_paths(&self, id: ProcessId) -> SupervisorResult<LogPaths> {
        Err(SupervisorError::LogPathsUnavailable { id })
    }
}

/// Probe with fixed host stats; per-process samples fail for unknown pids.
#[derive(Default)]
pub struct FixedProbe {
    pub broken: AtomicBool,
    pub live_pids: Mutex<HashSet<u32>>,
}

impl FixedProbe {
    pub fn with_pids(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            broken: AtomicBool::new(false),
            live_pids: Mutex::new(pids.into_iter().collect()),
        }
    }
}

impl SystemProbe for FixedProbe {
    async fn system_stats(&self) -> Result<SystemStats, ProbeError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProbeError::Unavailable {
                reason: "no /proc".to_string(),
            });
        }
        Ok(SystemStats {
            hostname: "box".to_string(),
            platform: "linux".to_string(),
            arch: "x86_64".to_string(),
            release: "6.1".to_string(),
            uptime_secs: 10,
            cpu_count: 4,
            memory: MemoryStats::new(512, 1024),
            cpu_percent: 12.0,
        })
    }

    async fn process_usage(&self, pid: u32) -> Result<ProcessSample, ProbeError> {
        if self.live_pids.lock().unwrap().contains(&pid) {
            Ok(ProcessSample {
                cpu_percent: 1.5,
                memory_bytes: 2048,
                memory_percent: 0.5,
            })
        } else {
            Err(ProbeError::ProcessGone { pid })
        }
    }
}
