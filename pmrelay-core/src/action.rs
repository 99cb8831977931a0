// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Action Proxy: viewer control actions forwarded to the supervisor.
//!
//! Readonly mode rejects before the supervisor is contacted. `all` fans out to
//! every known process and collects per-process failures without aborting
//! the batch. No timeout is imposed here; a daemon that never answers leaves
//! the action pending.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use serde::Serialize;

use crate::error::{ActionError, RelayError, RelayResult, SupervisorError};
use crate::process::{ProcessStatus, RawProcess};
use crate::supervisor::SupervisorClient;
use crate::types::{ActionTarget, ProcessAction, ProcessId};

/// Result for one process of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub process_id: ProcessId,
    pub error: Option<String>,
}

/// Aggregated result of one action request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub action: ProcessAction,
    pub target: ActionTarget,
    pub outcomes: Vec<ActionOutcome>,
    /// No bus event will follow, so the caller must refresh explicitly.
    pub force_refresh: bool,
}

impl ActionReport {
    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }
}

#[derive(Debug)]
pub struct ActionProxy {
    readonly: bool,
    executed: AtomicU64,
    rejected: AtomicU64,
}

impl ActionProxy {
    pub fn new(readonly: bool) -> Self {
        Self {
            readonly,
            executed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Run `action` against `target`.
    ///
    /// `Err` means nothing was attempted: readonly rejection, daemon
    /// unreachable, unknown target or no process at all.
    pub async fn execute<C: SupervisorClient>(
        &self,
        client: &C,
        action: ProcessAction,
        target: ActionTarget,
    ) -> RelayResult<ActionReport> {
        if self.readonly {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(action = %action, target = %target, "Denied, readonly");
            return Err(ActionError::Readonly { action }.into());
        }

        tracing::debug!(action = %action, target = %target, "Sending to pm2 daemon");
        let processes = client.list_processes().await?;

        let mut selected: Vec<RawProcess> = match target {
            ActionTarget::All => {
                if processes.is_empty() {
                    return Err(SupervisorError::NoProcesses.into());
                }
                processes
            }
            ActionTarget::One(id) => {
                let process = processes
                    .into_iter()
                    .find(|p| p.process_id == id)
                    .ok_or(SupervisorError::ProcessNotFound { id })?;
                vec![process]
            }
        };

        // `save` dumps the whole process table; one call covers every target.
        if action.is_daemon_wide() {
            selected.truncate(1);
        }

        let runs = selected.iter().map(|process| async move {
            let result = client.perform_action(action, process.process_id).await;
            (process, result)
        });

        let mut outcomes = Vec::with_capacity(selected.len());
        let mut force_refresh = false;
        for (process, result) in join_all(runs).await {
            match result {
                Ok(()) => {
                    force_refresh |= produces_no_bus_event(action, process.status);
                    outcomes.push(ActionOutcome {
                        process_id: process.process_id,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        action = %action,
                        process_id = %process.process_id,
                        error = %e,
                        "Action failed"
                    );
                    outcomes.push(ActionOutcome {
                        process_id: process.process_id,
                        error: Some(failure_message(action, &e.into())),
                    });
                }
            }
        }

        self.executed.fetch_add(1, Ordering::Relaxed);
        let report = ActionReport {
            action,
            target,
            outcomes,
            force_refresh,
        };
        tracing::debug!(
            action = %action,
            target = %target,
            succeeded = report.succeeded(),
            total = report.outcomes.len(),
            force_refresh = force_refresh,
            "Action completed"
        );
        Ok(report)
    }

    /// Requests executed and rejected as readonly.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.executed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
        )
    }
}

/// Deleting a process that is not online emits nothing on the bus.
pub fn produces_no_bus_event(action: ProcessAction, status: ProcessStatus) -> bool {
    action == ProcessAction::Delete && status != ProcessStatus::Online
}

/// Message a viewer sees for a failed action.
pub fn failure_message(action: ProcessAction, error: &RelayError) -> String {
    match error {
        RelayError::Action(ActionError::Readonly { .. }) => error.to_string(),
        other => format!(
            "Fatal to execute the <{}> operation due to {}",
            action, other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{raw_process, FakeSupervisor};

    fn five_processes() -> FakeSupervisor {
        FakeSupervisor::with_processes(
            (1..=5).map(|id| raw_process(id, ProcessStatus::Online)).collect(),
        )
    }

    #[tokio::test]
    async fn test_readonly_never_contacts_supervisor() {
        let client = five_processes();
        let proxy = ActionProxy::new(true);

        let err = proxy
            .execute(&client, ProcessAction::Stop, ActionTarget::One(ProcessId::new(7)))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("readonly"));
        assert_eq!(client.list_calls(), 0);
        assert!(client.actions().is_empty());
        assert_eq!(proxy.counts(), (0, 1));
    }

    #[tokio::test]
    async fn test_all_continues_past_failures() {
        let client = five_processes();
        client.fail_action_on(3);
        let proxy = ActionProxy::new(false);

        let report = proxy
            .execute(&client, ProcessAction::Delete, ActionTarget::All)
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.succeeded(), 4);
        let failed: Vec<ProcessId> = report.failures().map(|o| o.process_id).collect();
        assert_eq!(failed, vec![ProcessId::new(3)]);
        assert!(report.outcomes[2]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Fatal to execute the <delete> operation due to"));
        assert_eq!(client.actions().len(), 5);
    }

    #[tokio::test]
    async fn test_all_without_processes() {
        let client = FakeSupervisor::default();
        let proxy = ActionProxy::new(false);
        let err = proxy
            .execute(&client, ProcessAction::Restart, ActionTarget::All)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No PM2 process is running!");
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let client = five_processes();
        let proxy = ActionProxy::new(false);
        let err = proxy
            .execute(&client, ProcessAction::Stop, ActionTarget::One(ProcessId::new(42)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot find pm process by pm_id: 42");
        assert!(client.actions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_stopped_process_forces_refresh() {
        let client = FakeSupervisor::with_processes(vec![
            raw_process(0, ProcessStatus::Online),
            raw_process(1, ProcessStatus::Stopped),
        ]);
        let proxy = ActionProxy::new(false);

        let online = proxy
            .execute(&client, ProcessAction::Delete, ActionTarget::One(ProcessId::new(0)))
            .await
            .unwrap();
        assert!(!online.force_refresh);

        let stopped = proxy
            .execute(&client, ProcessAction::Delete, ActionTarget::One(ProcessId::new(1)))
            .await
            .unwrap();
        assert!(stopped.force_refresh);

        let stop = proxy
            .execute(&client, ProcessAction::Stop, ActionTarget::One(ProcessId::new(1)))
            .await
            .unwrap();
        assert!(!stop.force_refresh);
    }

    #[tokio::test]
    async fn test_save_all_runs_once() {
        let client = five_processes();
        let proxy = ActionProxy::new(false);

        let report = proxy
            .execute(&client, ProcessAction::Save, ActionTarget::All)
            .await
            .unwrap();

        assert_eq!(client.actions(), vec![(ProcessAction::Save, ProcessId::new(1))]);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.succeeded(), 1);
    }
}
