// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for pmrelay.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! The `Display` text of a scoped error is exactly what the affected viewer sees.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ProcessAction, ProcessId};

/// Top-level error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Supervisor Daemon Errors - Recoverable, previous snapshot retained
    // =========================================================================
    #[error("{0}")]
    Supervisor(#[from] SupervisorError),

    // =========================================================================
    // Viewer Request Errors - Scoped to the requesting viewer
    // =========================================================================
    #[error("{0}")]
    Action(#[from] ActionError),

    #[error("{0}")]
    Probe(#[from] ProbeError),

    #[error("{0}")]
    Tail(#[from] TailError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors prevent startup.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },
}

/// Failures talking to the supervisor daemon.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Can not connect to {socket}: {reason}")]
    Unreachable { socket: String, reason: String },

    #[error("{call} failed: {message}")]
    Rpc { call: &'static str, message: String },

    #[error("Cannot find pm process by pm_id: {id}")]
    ProcessNotFound { id: ProcessId },

    #[error("No PM2 process is running!")]
    NoProcesses,

    #[error("malformed daemon response: {message}")]
    Decode { message: String },

    #[error("No log file is configured for pm_id: {id}")]
    LogPathsUnavailable { id: ProcessId },
}

/// Rejections of viewer action requests.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Fatal to execute the <{action}> operation due to denied by server, it is readonly!")]
    Readonly { action: ProcessAction },

    #[error("Unknown action: {name}")]
    UnknownAction { name: String },

    #[error("Invalid action target: {value}")]
    InvalidTarget { value: String },
}

/// Host or per-process sampling failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("process {pid} no longer exists")]
    ProcessGone { pid: u32 },

    #[error("pm_id {id} has no running system process")]
    NotRunning { id: ProcessId },

    #[error("sampling unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Log tail failures.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("Failed to spawn log tail: {reason}")]
    Spawn { reason: String },

    #[error("No log file to tail for pm_id: {id}")]
    NoLogFiles { id: ProcessId },

    #[error("Log tail for pm_id {id} ended")]
    Ended { id: ProcessId },
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;

/// Result type alias for Supervisor Client calls.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "port",
            context: "server".to_string(),
        };
        assert!(err.to_string().contains("port"));
        assert!(err.to_string().contains("server"));
    }

    #[test]
    fn test_error_chain() {
        let err: RelayError = SupervisorError::NoProcesses.into();
        assert!(matches!(err, RelayError::Supervisor(_)));
        assert_eq!(err.to_string(), "No PM2 process is running!");
    }

    #[test]
    fn test_readonly_message() {
        let err = ActionError::Readonly {
            action: ProcessAction::Stop,
        };
        assert_eq!(
            err.to_string(),
            "Fatal to execute the <stop> operation due to denied by server, it is readonly!"
        );
    }

    #[test]
    fn test_process_not_found_message() {
        let err = SupervisorError::ProcessNotFound {
            id: ProcessId::new(9),
        };
        assert_eq!(err.to_string(), "Cannot find pm process by pm_id: 9");
    }
}
