// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! PM2 adapter driving the `pm2` command line.
//!
//! The daemon's event bus is derived by polling `pm2 jlist` and diffing
//! successive lists into `SupervisorEvent`s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{LogPaths, SupervisorClient, SupervisorEvent};
use crate::config::DaemonConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::process::{ProcessStatus, RawProcess, ResourceUsage};
use crate::types::{ProcessAction, ProcessId};

const EVENT_BUFFER: usize = 256;

/// Supervisor Client backed by the `pm2` binary.
#[derive(Debug, Clone)]
pub struct Pm2Client {
    binary: String,
    home: PathBuf,
    rpc_socket: PathBuf,
    pub_socket: PathBuf,
    poll_interval: Duration,
}

impl Pm2Client {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            home: config.home.clone(),
            rpc_socket: config.rpc_socket.clone(),
            pub_socket: config.pub_socket.clone(),
            poll_interval: config.event_poll_interval,
        }
    }

    /// Fail with `Unreachable` when the given daemon socket file is missing.
    /// Running `pm2` without a daemon would otherwise spawn one.
    fn ensure_socket(socket: &Path) -> SupervisorResult<()> {
        if socket.exists() {
            Ok(())
        } else {
            Err(SupervisorError::Unreachable {
                socket: socket.display().to_string(),
                reason: "connect ECONNREFUSED".to_string(),
            })
        }
    }

    async fn run(&self, call: &'static str, args: &[&str]) -> SupervisorResult<String> {
        tracing::trace!(binary = %self.binary, call = call, "Invoking pm2");

        let output = Command::new(&self.binary)
            .args(args)
            .env("PM2_HOME", &self.home)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SupervisorError::Unreachable {
                socket: self.rpc_socket.display().to_string(),
                reason: format!("{}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SupervisorError::Rpc {
                call,
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn poll_events(self, tx: mpsc::Sender<SupervisorEvent>) {
        let mut previous = self.list_processes().await.unwrap_or_default();
        loop {
            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.list_processes().await {
                Ok(current) => {
                    for event in diff_processes(&previous, &current) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    previous = current;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Event poll failed");
                }
            }
        }
    }
}

impl SupervisorClient for Pm2Client {
    async fn list_processes(&self) -> SupervisorResult<Vec<RawProcess>> {
        if !self.rpc_socket.exists() {
            return Ok(Vec::new());
        }
        let stdout = self.run("jlist", &["jlist"]).await?;
        parse_jlist(&stdout)
    }

    async fn version(&self) -> SupervisorResult<String> {
        Self::ensure_socket(&self.rpc_socket)?;
        let stdout = self.run("getVersion", &["-v"]).await?;
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| SupervisorError::Decode {
                message: "empty version output".to_string(),
            })
    }

    async fn perform_action(&self, action: ProcessAction, id: ProcessId) -> SupervisorResult<()> {
        Self::ensure_socket(&self.rpc_socket)?;
        let id = id.to_string();
        let args: Vec<&str> = match action {
            ProcessAction::Save => vec!["save"],
            other => vec![other.name(), id.as_str()],
        };
        self.run(action.name(), &args).await.map(|_| ())
    }

    async fn subscribe_events(&self) -> SupervisorResult<mpsc::Receiver<SupervisorEvent>> {
        Self::ensure_socket(&self.pub_socket)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(self.clone().poll_events(tx));
        tracing::info!(socket = %self.pub_socket.display(), "Subscribed to pm2 process events");
        Ok(rx)
    }

    async fn log_paths(&self, id: ProcessId) -> SupervisorResult<LogPaths> {
        let processes = self.list_processes().await?;
        let process = processes
            .into_iter()
            .find(|p| p.process_id == id)
            .ok_or(SupervisorError::ProcessNotFound { id })?;

        let env = process.env.unwrap_or_default();
        let path = |key: &str| env.get(key).and_then(Value::as_str).map(PathBuf::from);
        let paths = LogPaths {
            out: path("pm_out_log_path"),
            err: path("pm_err_log_path"),
        };
        if paths.files().is_empty() {
            return Err(SupervisorError::LogPathsUnavailable { id });
        }
        Ok(paths)
    }
}

#[derive(Debug, Deserialize)]
struct Pm2Process {
    pm_id: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    monit: Option<Pm2Monit>,
    #[serde(default)]
    pm2_env: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Monit {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: u64,
}

impl From<Pm2Process> for RawProcess {
    fn from(p: Pm2Process) -> Self {
        let monit = p.monit.unwrap_or_default();
        let env = p.pm2_env;
        let field = |key: &str| env.as_ref().and_then(|e| e.get(key));

        let status = field("status")
            .and_then(Value::as_str)
            .map(ProcessStatus::from_pm2)
            .unwrap_or(ProcessStatus::Stopped);
        let restart_count = field("restart_time")
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        let started_at = field("pm_uptime").and_then(Value::as_i64);

        RawProcess {
            process_id: ProcessId::new(p.pm_id),
            name: p.name,
            pid: p.pid.filter(|pid| *pid != 0),
            status,
            restart_count,
            started_at,
            usage: ResourceUsage {
                cpu_percent: monit.cpu,
                memory_bytes: monit.memory,
            },
            env,
        }
    }
}

/// Parse `pm2 jlist` output. Anything printed before the JSON array is skipped.
fn parse_jlist(output: &str) -> SupervisorResult<Vec<RawProcess>> {
    let start = output.find('[').ok_or_else(|| SupervisorError::Decode {
        message: "no process array in jlist output".to_string(),
    })?;
    let processes: Vec<Pm2Process> =
        serde_json::from_str(output[start..].trim_end()).map_err(|e| SupervisorError::Decode {
            message: e.to_string(),
        })?;
    Ok(processes.into_iter().map(RawProcess::from).collect())
}

/// Turn two successive process lists into bus events.
///
/// A process removed while not online yields nothing, mirroring the daemon,
/// which emits no event when a stopped process is deleted.
pub fn diff_processes(previous: &[RawProcess], current: &[RawProcess]) -> Vec<SupervisorEvent> {
    let before: HashMap<ProcessId, &RawProcess> =
        previous.iter().map(|p| (p.process_id, p)).collect();
    let mut events = Vec::new();

    for next in current {
        let id = next.process_id;
        let name = next.name.clone();
        let online = next.status == ProcessStatus::Online;

        match before.get(&id) {
            None => {
                events.push(SupervisorEvent::ProcessStarted {
                    id,
                    name: name.clone(),
                });
                if online {
                    events.push(SupervisorEvent::ProcessOnline { id, name });
                }
            }
            Some(prev) => {
                let was_online = prev.status == ProcessStatus::Online;
                if next.restart_count > prev.restart_count
                    || (was_online && online && prev.pid != next.pid)
                {
                    events.push(SupervisorEvent::ProcessRestarted { id, name });
                } else if online && !was_online {
                    events.push(SupervisorEvent::ProcessOnline { id, name });
                } else if was_online && !online {
                    events.push(SupervisorEvent::ProcessExited { id, name });
                }
            }
        }
    }

    let remaining: HashMap<ProcessId, ()> = current.iter().map(|p| (p.process_id, ())).collect();
    for prev in previous {
        if !remaining.contains_key(&prev.process_id) && prev.status == ProcessStatus::Online {
            events.push(SupervisorEvent::ProcessExited {
                id: prev.process_id,
                name: prev.name.clone(),
            });
        }
    }

    events
}
