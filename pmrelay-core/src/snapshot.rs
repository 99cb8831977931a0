// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Snapshot Store: the latest process list and host stats.
//!
//! Both are replaced wholesale. A failed process refresh keeps the previous
//! list and tells viewers the daemon is unreachable; a failed host sample is
//! only logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::SupervisorResult;
use crate::event::ServerEvent;
use crate::process::ProcessRecord;
use crate::router::BroadcastRouter;
use crate::supervisor::SupervisorClient;
use crate::system::{SystemProbe, SystemStats};
use crate::types::Channel;

/// Shared, immutable process list.
pub type ProcessList = Arc<Vec<ProcessRecord>>;

#[derive(Debug, Default)]
pub struct SnapshotStore {
    processes: RwLock<Option<ProcessList>>,
    system: RwLock<Option<SystemStats>>,
    // Serializes process refreshes; held across the daemon round-trip.
    refresh_gate: tokio::sync::Mutex<()>,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll the supervisor, store the normalized list and broadcast it.
    ///
    /// Refreshes never overlap; a caller arriving mid-refresh waits for the
    /// current one and then runs its own.
    pub async fn refresh_processes<C: SupervisorClient>(
        &self,
        client: &C,
        router: &BroadcastRouter,
    ) -> SupervisorResult<ProcessList> {
        let _gate = self.refresh_gate.lock().await;
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        match client.list_processes().await {
            Ok(raw) => {
                let list: ProcessList =
                    Arc::new(raw.into_iter().map(ProcessRecord::normalize).collect());
                *write(&self.processes) = Some(Arc::clone(&list));
                tracing::debug!(processes = list.len(), "Process snapshot refreshed");
                router.broadcast(Channel::Processes, ServerEvent::ProcessList(Arc::clone(&list)));
                Ok(list)
            }
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Process refresh failed, keeping previous snapshot");
                router.broadcast(
                    Channel::Processes,
                    ServerEvent::InfoMessage(unreachable_message(&e)),
                );
                Err(e)
            }
        }
    }

    /// Sample host stats, store and broadcast them. Failures are logged only.
    pub async fn refresh_system_stats<P: SystemProbe>(
        &self,
        probe: &P,
        router: &BroadcastRouter,
    ) -> Option<SystemStats> {
        match probe.system_stats().await {
            Ok(stats) => {
                *write(&self.system) = Some(stats.clone());
                router.broadcast(Channel::System, ServerEvent::SystemStats(stats.clone()));
                Some(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "Can not load system/cpu/memory information");
                None
            }
        }
    }

    pub fn processes(&self) -> Option<ProcessList> {
        read(&self.processes).clone()
    }

    pub fn system_stats(&self) -> Option<SystemStats> {
        read(&self.system).clone()
    }

    /// Process refreshes attempted and failed.
    pub fn refresh_counts(&self) -> (u64, u64) {
        (
            self.refreshes.load(Ordering::Relaxed),
            self.refresh_failures.load(Ordering::Relaxed),
        )
    }
}

/// Text viewers see while the daemon cannot be reached.
pub fn unreachable_message(cause: &dyn std::fmt::Display) -> String {
    format!("Fatal to connect to pm2 daemon due to {}", cause)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
