// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Supervised process records and their normalization.
//!
//! A `RawProcess` is what the Supervisor Client reports. `ProcessRecord` is the
//! normalized form exposed to viewers: owner resolved, reserved environment
//! keys stripped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ProcessId;

/// Environment key the owner is read from.
pub const OWNER_ENV_KEY: &str = "USER";

/// Owner reported when the supervisor sends no environment block.
pub const UNKNOWN_OWNER: &str = "UNKNOWN";

/// Lifecycle status of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopping,
    Stopped,
    Errored,
    Launching,
}

impl ProcessStatus {
    /// Map a PM2 status string. Transitional PM2 states count as launching.
    pub fn from_pm2(status: &str) -> Self {
        match status {
            "online" => Self::Online,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "launching" | "waiting restart" | "one-launch-status" => Self::Launching,
            _ => Self::Errored,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
            Self::Launching => "launching",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Resource usage as reported by the supervisor at poll time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Process as reported by the Supervisor Client, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProcess {
    pub process_id: ProcessId,
    pub name: String,
    /// Operating-system pid; `None` while the process is not running.
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub restart_count: u32,
    /// Start time in milliseconds since the Unix epoch.
    pub started_at: Option<i64>,
    pub usage: ResourceUsage,
    pub env: Option<Map<String, Value>>,
}

/// Normalized process record owned by the Snapshot Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub process_id: ProcessId,
    pub name: String,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub restart_count: u32,
    pub started_at: Option<i64>,
    pub usage: ResourceUsage,
    pub owner: String,
    pub env: Map<String, Value>,
}

impl ProcessRecord {
    /// Normalize a raw record: resolve the owner, drop reserved environment keys.
    pub fn normalize(raw: RawProcess) -> Self {
        let (owner, env) = match raw.env {
            Some(env) => {
                let owner = env
                    .get(OWNER_ENV_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_OWNER)
                    .to_string();
                let env = env
                    .into_iter()
                    .filter(|(key, _)| !is_reserved_env_key(key))
                    .collect();
                (owner, env)
            }
            None => (UNKNOWN_OWNER.to_string(), Map::new()),
        };

        Self {
            process_id: raw.process_id,
            name: raw.name,
            pid: raw.pid,
            status: raw.status,
            restart_count: raw.restart_count,
            started_at: raw.started_at,
            usage: raw.usage,
            owner,
            env,
        }
    }
}

/// Whether an environment key is internal to the supervisor and must not be exposed.
///
/// Reserved: `_`/`axm_` prefixes, keys mentioning versioning or command, and any
/// key whose first character sorts at or below `'Z'` (upper-case and shell-style keys).
pub fn is_reserved_env_key(key: &str) -> bool {
    let Some(first) = key.chars().next() else {
        return true;
    };
    if first <= 'Z' {
        return true;
    }
    if key.starts_with('_') || key.starts_with("axm_") {
        return true;
    }
    let lower = key.to_ascii_lowercase();
    lower.contains("versioning") || lower.contains("command")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(env: Option<Value>) -> RawProcess {
        RawProcess {
            process_id: ProcessId::new(1),
            name: "api".to_string(),
            pid: Some(4242),
            status: ProcessStatus::Online,
            restart_count: 2,
            started_at: Some(1_700_000_000_000),
            usage: ResourceUsage {
                cpu_percent: 1.5,
                memory_bytes: 1024,
            },
            env: env.and_then(|v| v.as_object().cloned()),
        }
    }

    #[test]
    fn test_owner_defaults_without_env() {
        let record = ProcessRecord::normalize(raw(None));
        assert_eq!(record.owner, UNKNOWN_OWNER);
        assert!(record.env.is_empty());
    }

    #[test]
    fn test_owner_from_user_key() {
        let record = ProcessRecord::normalize(raw(Some(json!({"USER": "deploy"}))));
        assert_eq!(record.owner, "deploy");
        assert!(!record.env.contains_key("USER"));
    }

    #[test]
    fn test_reserved_keys_stripped() {
        let record = ProcessRecord::normalize(raw(Some(json!({
            "USER": "deploy",
            "PATH": "/usr/bin",
            "_pm2_version": "5.3.0",
            "axm_monitor": {},
            "versioning": null,
            "exec_command": "node",
            "pm_cwd": "/srv/api",
            "status": "online",
            "2fa": true,
            "": 1
        }))));

        let keys: Vec<&str> = record.env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["pm_cwd", "status"]);
    }

    #[test]
    fn test_normalized_env_never_contains_reserved_keys() {
        let candidates = [
            "HOME", "_x", "__", "axm_actions", "axm_", "Versioning", "command", "node_COMMAND",
            "a", "exec_mode", "pm_id", "Zeta", "zeta", "[weird", "~tilde", "0abc", "@scope",
        ];
        let mut env = Map::new();
        for key in candidates {
            env.insert(key.to_string(), json!(key));
        }
        let record = ProcessRecord::normalize(raw(Some(Value::Object(env))));

        for key in record.env.keys() {
            assert!(!is_reserved_env_key(key), "leaked reserved key {key}");
        }
        assert!(record.env.contains_key("exec_mode"));
        assert!(record.env.contains_key("zeta"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProcessStatus::from_pm2("online"), ProcessStatus::Online);
        assert_eq!(ProcessStatus::from_pm2("waiting restart"), ProcessStatus::Launching);
        assert_eq!(ProcessStatus::from_pm2("errored"), ProcessStatus::Errored);
        assert_eq!(ProcessStatus::from_pm2("stopped"), ProcessStatus::Stopped);
    }
}
