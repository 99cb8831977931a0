// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-process CPU/memory sampling for usage subscriptions.
//!
//! The operating-system pid behind a `pm_id` is re-resolved through the
//! supervisor only every Nth tick, bounding daemon load while the sample
//! cadence stays fixed.

use crate::error::{ProbeError, RelayResult, SupervisorError};
use crate::event::ServerEvent;
use crate::supervisor::SupervisorClient;
use crate::system::SystemProbe;
use crate::types::ProcessId;

#[derive(Debug)]
pub struct UsageSampler {
    process_id: ProcessId,
    requery_every: u32,
    tick: u32,
    pid: Option<u32>,
}

impl UsageSampler {
    pub fn new(process_id: ProcessId, requery_every: u32) -> Self {
        Self {
            process_id,
            requery_every: requery_every.max(1),
            tick: 0,
            pid: None,
        }
    }

    /// Take one sample, re-resolving the pid on every Nth tick.
    pub async fn sample<C, P>(&mut self, client: &C, probe: &P) -> RelayResult<ServerEvent>
    where
        C: SupervisorClient,
        P: SystemProbe,
    {
        let requery = self.pid.is_none() || self.tick % self.requery_every == 0;
        self.tick = self.tick.wrapping_add(1);

        if requery {
            self.pid = Some(self.resolve_pid(client).await?);
        }
        let pid = self.pid.ok_or(ProbeError::NotRunning {
            id: self.process_id,
        })?;

        let sample = probe.process_usage(pid).await?;
        tracing::trace!(
            process_id = %self.process_id,
            pid = pid,
            cpu = sample.cpu_percent,
            "Usage sampled"
        );

        Ok(ServerEvent::UsageData {
            process_id: self.process_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
        })
    }

    async fn resolve_pid<C: SupervisorClient>(&self, client: &C) -> RelayResult<u32> {
        let processes = client.list_processes().await?;
        let process = processes
            .iter()
            .find(|p| p.process_id == self.process_id)
            .ok_or(SupervisorError::ProcessNotFound {
                id: self.process_id,
            })?;
        Ok(process.pid.ok_or(ProbeError::NotRunning {
            id: self.process_id,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessStatus;
    use crate::testing::{raw_process, FakeSupervisor, FixedProbe};

    #[tokio::test]
    async fn test_requery_every_third_tick() {
        let client = FakeSupervisor::with_processes(vec![raw_process(42, ProcessStatus::Online)]);
        let probe = FixedProbe::with_pids([1042]);
        let mut sampler = UsageSampler::new(ProcessId::new(42), 3);

        for _ in 0..7 {
            let event = sampler.sample(&client, &probe).await.unwrap();
            assert!(matches!(
                event,
                ServerEvent::UsageData { process_id, memory_percent, .. }
                    if process_id == ProcessId::new(42) && memory_percent == 0.5
            ));
        }
        // Ticks 0, 3 and 6.
        assert_eq!(client.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_stopped_process_fails() {
        let client = FakeSupervisor::with_processes(vec![raw_process(5, ProcessStatus::Stopped)]);
        let probe = FixedProbe::default();
        let mut sampler = UsageSampler::new(ProcessId::new(5), 3);

        let err = sampler.sample(&client, &probe).await.unwrap_err();
        assert!(err.to_string().contains("no running system process"));
    }

    #[tokio::test]
    async fn test_vanished_process_fails() {
        let client = FakeSupervisor::with_processes(vec![raw_process(5, ProcessStatus::Online)]);
        let probe = FixedProbe::default();
        let mut sampler = UsageSampler::new(ProcessId::new(5), 3);

        let err = sampler.sample(&client, &probe).await.unwrap_err();
        assert!(err.to_string().contains("no longer exists"));

        client.set_processes(Vec::new());
        let mut sampler = UsageSampler::new(ProcessId::new(5), 3);
        let err = sampler.sample(&client, &probe).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot find pm process by pm_id: 5");
    }
}
