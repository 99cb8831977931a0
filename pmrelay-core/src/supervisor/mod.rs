// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Supervisor Client capability.
//!
//! The relay consumes the process-management daemon only through
//! `SupervisorClient`. `Pm2Client` is the concrete PM2 adapter.

mod pm2;

pub use pm2::{diff_processes, Pm2Client};

use std::future::Future;
use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::{SupervisorError, SupervisorResult, TailError};
use crate::process::RawProcess;
use crate::tail::LogTail;
use crate::types::{ProcessAction, ProcessId};

/// Closed set of daemon bus events the relay reacts to.
/// Anything else the daemon emits is never turned into one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    ProcessStarted { id: ProcessId, name: String },
    ProcessRestarted { id: ProcessId, name: String },
    ProcessExited { id: ProcessId, name: String },
    ProcessOnline { id: ProcessId, name: String },
}

impl SupervisorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessStarted { .. } => "start",
            Self::ProcessRestarted { .. } => "restart",
            Self::ProcessExited { .. } => "exit",
            Self::ProcessOnline { .. } => "online",
        }
    }

    pub fn process(&self) -> (ProcessId, &str) {
        match self {
            Self::ProcessStarted { id, name }
            | Self::ProcessRestarted { id, name }
            | Self::ProcessExited { id, name }
            | Self::ProcessOnline { id, name } => (*id, name),
        }
    }
}

/// Log files the daemon writes for one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPaths {
    pub out: Option<PathBuf>,
    pub err: Option<PathBuf>,
}

impl LogPaths {
    /// Existing-or-not files to follow, stdout first, duplicates removed.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Vec::with_capacity(2);
        for path in [&self.out, &self.err].into_iter().flatten() {
            if !files.contains(path) {
                files.push(path.clone());
            }
        }
        files
    }
}

/// Capability the relay needs from the supervisor daemon.
pub trait SupervisorClient: Send + Sync + 'static {
    /// Current process list. A missing control socket is an empty list, not an error.
    fn list_processes(&self) -> impl Future<Output = SupervisorResult<Vec<RawProcess>>> + Send;

    fn version(&self) -> impl Future<Output = SupervisorResult<String>> + Send;

    fn perform_action(
        &self,
        action: ProcessAction,
        id: ProcessId,
    ) -> impl Future<Output = SupervisorResult<()>> + Send;

    /// Subscribe to the daemon's process event bus.
    fn subscribe_events(
        &self,
    ) -> impl Future<Output = SupervisorResult<mpsc::Receiver<SupervisorEvent>>> + Send;

    fn log_paths(&self, id: ProcessId) -> impl Future<Output = SupervisorResult<LogPaths>> + Send;

    /// Follow the last `lines` lines of a process's logs.
    fn tail_log(
        &self,
        id: ProcessId,
        lines: usize,
    ) -> impl Future<Output = Result<LogTail, TailLogError>> + Send {
        async move {
            let files = self.log_paths(id).await?.files();
            if files.is_empty() {
                return Err(TailError::NoLogFiles { id }.into());
            }
            Ok(LogTail::spawn(&files, lines)?)
        }
    }
}

/// Failure to start a log tail: either resolving paths or spawning.
#[derive(Debug, thiserror::Error)]
pub enum TailLogError {
    #[error("{0}")]
    Supervisor(#[from] SupervisorError),

    #[error("{0}")]
    Tail(#[from] TailError),
}
