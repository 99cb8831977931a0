// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Events exchanged with viewers.
//!
//! Server events serialize as `{"event": "<name>", "data": {...}}`, client
//! requests as `{"request": "<name>", ...fields}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::process::ProcessRecord;
use crate::system::SystemStats;
use crate::types::{ActionTarget, Channel, ProcessAction, ProcessId};

/// Server to viewer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    SystemStats(SystemStats),
    VersionInfo(String),
    ActionResult {
        action: ProcessAction,
        target_id: ActionTarget,
        error: Option<String>,
    },
    ProcessList(Arc<Vec<ProcessRecord>>),
    InfoMessage(String),
    LogData {
        process_id: ProcessId,
        text: String,
    },
    LogError {
        process_id: ProcessId,
        message: String,
    },
    UsageData {
        process_id: ProcessId,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
        cpu_percent: f64,
        memory_percent: f64,
    },
    UsageError {
        process_id: ProcessId,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemStats(_) => "systemStats",
            Self::VersionInfo(_) => "versionInfo",
            Self::ActionResult { .. } => "actionResult",
            Self::ProcessList(_) => "processList",
            Self::InfoMessage(_) => "infoMessage",
            Self::LogData { .. } => "logData",
            Self::LogError { .. } => "logError",
            Self::UsageData { .. } => "usageData",
            Self::UsageError { .. } => "usageError",
        }
    }

    /// Channel this event is delivered on.
    pub fn channel(&self) -> Channel {
        match self {
            Self::SystemStats(_) | Self::VersionInfo(_) | Self::ActionResult { .. } => {
                Channel::System
            }
            Self::ProcessList(_) | Self::InfoMessage(_) => Channel::Processes,
            Self::LogData { .. } | Self::LogError { .. } => Channel::Log,
            Self::UsageData { .. } | Self::UsageError { .. } => Channel::Usage,
        }
    }
}

/// Viewer to server request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "request",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    RequestAction {
        action: ProcessAction,
        target_id: ActionTarget,
    },
    PullProcesses,
    SubscribeLog {
        process_id: ProcessId,
        #[serde(default)]
        keep_ansi: bool,
    },
    UnsubscribeLog {
        process_id: ProcessId,
    },
    SubscribeUsage {
        process_id: ProcessId,
    },
    UnsubscribeUsage {
        process_id: ProcessId,
    },
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestAction { .. } => "requestAction",
            Self::PullProcesses => "pullProcesses",
            Self::SubscribeLog { .. } => "subscribeLog",
            Self::UnsubscribeLog { .. } => "unsubscribeLog",
            Self::SubscribeUsage { .. } => "subscribeUsage",
            Self::UnsubscribeUsage { .. } => "unsubscribeUsage",
        }
    }

    /// Channel on which this request is accepted.
    pub fn channel(&self) -> Channel {
        match self {
            Self::RequestAction { .. } => Channel::System,
            Self::PullProcesses => Channel::Processes,
            Self::SubscribeLog { .. } | Self::UnsubscribeLog { .. } => Channel::Log,
            Self::SubscribeUsage { .. } | Self::UnsubscribeUsage { .. } => Channel::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_event_wire_shape() {
        let event = ServerEvent::UsageData {
            process_id: ProcessId::new(42),
            timestamp: 1_700_000_000_000,
            cpu_percent: 12.5,
            memory_percent: 3.25,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "usageData",
                "data": {
                    "processId": 42,
                    "timestamp": 1_700_000_000_000i64,
                    "cpuPercent": 12.5,
                    "memoryPercent": 3.25
                }
            })
        );

        let info = ServerEvent::InfoMessage("daemon down".to_string());
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"event": "infoMessage", "data": "daemon down"})
        );
    }

    #[test]
    fn test_action_result_all_target() {
        let event = ServerEvent::ActionResult {
            action: ProcessAction::Delete,
            target_id: ActionTarget::All,
            error: Some("No PM2 process is running!".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["targetId"], json!("all"));
        assert_eq!(value["data"]["action"], json!("delete"));
    }

    #[test]
    fn test_client_request_parse() {
        let request: ClientRequest = serde_json::from_value(json!({
            "request": "requestAction",
            "action": "restart",
            "targetId": "all"
        }))
        .unwrap();
        assert_eq!(
            request,
            ClientRequest::RequestAction {
                action: ProcessAction::Restart,
                target_id: ActionTarget::All,
            }
        );

        let request: ClientRequest =
            serde_json::from_str(r#"{"request":"subscribeLog","processId":3}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::SubscribeLog {
                process_id: ProcessId::new(3),
                keep_ansi: false,
            }
        );

        let request: ClientRequest = serde_json::from_str(r#"{"request":"pullProcesses"}"#).unwrap();
        assert_eq!(request.channel(), Channel::Processes);
    }

    #[test]
    fn test_malformed_requests_rejected() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"request":"reload"}"#).is_err());
        assert!(serde_json::from_str::<ClientRequest>(r#"{"request":"subscribeUsage"}"#).is_err());
        assert!(serde_json::from_str::<ClientRequest>("not json").is_err());
    }

    #[test]
    fn test_event_channels() {
        assert_eq!(ServerEvent::VersionInfo("5.3.0".into()).channel(), Channel::System);
        assert_eq!(
            ServerEvent::ProcessList(Arc::new(Vec::new())).channel(),
            Channel::Processes
        );
    }
}
