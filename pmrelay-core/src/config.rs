// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict validation.
//!
//! Read once at startup. Any invalid field results in a HardValidationError
//! that prevents the relay from starting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HardValidationError, RelayError, RelayResult};
use crate::types::Port;

/// Heartbeat period between host-stat samples.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(5000);
/// Cadence of usage samples delivered to viewers.
pub const DEFAULT_USAGE_INTERVAL: Duration = Duration::from_millis(3000);
/// Usage ticks between supervisor re-queries.
pub const DEFAULT_USAGE_REQUERY_EVERY: u32 = 3;
/// Refresh Throttler coalescing window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
/// How long an idle subscription keeps its background work.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_millis(4000);
/// Period of the idle subscription sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(4000);
/// Lines replayed when a log tail starts.
pub const DEFAULT_LOG_TAIL_LINES: usize = 200;

const MIN_INTERVAL_MS: u64 = 1000;
const MIN_EVENT_POLL_MS: u64 = 200;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Raw daemon section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawDaemonConfig {
    #[serde(default)]
    home: Option<String>,
    #[serde(default)]
    rpc_socket: Option<String>,
    #[serde(default)]
    pub_socket: Option<String>,
    #[serde(default = "default_binary")]
    binary: String,
    #[serde(default = "default_event_poll_ms")]
    event_poll_ms: u64,
}

fn default_binary() -> String {
    "pm2".to_string()
}

fn default_event_poll_ms() -> u64 {
    1000
}

impl Default for RawDaemonConfig {
    fn default() -> Self {
        Self {
            home: None,
            rpc_socket: None,
            pub_socket: None,
            binary: default_binary(),
            event_poll_ms: default_event_poll_ms(),
        }
    }
}

/// Raw monitor section.
#[derive(Debug, Deserialize)]
struct RawMonitorConfig {
    #[serde(default = "default_refresh_interval_ms")]
    refresh_interval_ms: u64,
    #[serde(default = "default_usage_interval_ms")]
    usage_interval_ms: u64,
    #[serde(default = "default_usage_requery_every")]
    usage_requery_every: u32,
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
    #[serde(default = "default_idle_grace_ms")]
    idle_grace_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    sweep_interval_ms: u64,
    #[serde(default = "default_log_tail_lines")]
    log_tail_lines: usize,
    #[serde(default)]
    readonly: bool,
    #[serde(default)]
    max_restarts: u32,
}

fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_millis() as u64
}

fn default_usage_interval_ms() -> u64 {
    DEFAULT_USAGE_INTERVAL.as_millis() as u64
}

fn default_usage_requery_every() -> u32 {
    DEFAULT_USAGE_REQUERY_EVERY
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_idle_grace_ms() -> u64 {
    DEFAULT_IDLE_GRACE.as_millis() as u64
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_millis() as u64
}

fn default_log_tail_lines() -> usize {
    DEFAULT_LOG_TAIL_LINES
}

impl Default for RawMonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            usage_interval_ms: default_usage_interval_ms(),
            usage_requery_every: default_usage_requery_every(),
            debounce_ms: default_debounce_ms(),
            idle_grace_ms: default_idle_grace_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            log_tail_lines: default_log_tail_lines(),
            readonly: false,
            max_restarts: 0,
        }
    }
}

/// Raw server section.
#[derive(Debug, Deserialize)]
struct RawServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    authorization: String,
}

fn default_port() -> u16 {
    8088
}

impl Default for RawServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            authorization: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLogConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RawLogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    daemon: RawDaemonConfig,
    #[serde(default)]
    monitor: RawMonitorConfig,
    #[serde(default)]
    server: RawServerConfig,
    #[serde(default)]
    log: RawLogConfig,
}

/// Where the supervisor daemon lives.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub home: PathBuf,
    pub rpc_socket: PathBuf,
    pub pub_socket: PathBuf,
    pub binary: String,
    /// Period of the process-list poll that feeds the event bus.
    pub event_poll_interval: Duration,
}

/// Timing and policy knobs of the monitor engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub refresh_interval: Duration,
    pub usage_interval: Duration,
    pub usage_requery_every: u32,
    pub debounce: Duration,
    pub idle_grace: Duration,
    pub sweep_interval: Duration,
    pub log_tail_lines: usize,
    pub readonly: bool,
    pub max_restarts: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            usage_interval: DEFAULT_USAGE_INTERVAL,
            usage_requery_every: DEFAULT_USAGE_REQUERY_EVERY,
            debounce: DEFAULT_DEBOUNCE,
            idle_grace: DEFAULT_IDLE_GRACE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            readonly: false,
            max_restarts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: Port,
    /// Shared secret; `None` disables the gate.
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub level: String,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub daemon: DaemonConfig,
    pub monitor: MonitorSettings,
    pub server: ServerConfig,
    pub log: LogConfig,
}

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub readonly: bool,
    pub authorization: Option<String>,
    pub refresh_interval_ms: Option<u64>,
    pub usage_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    fn apply(&self, raw: &mut RawConfig) {
        if let Some(port) = self.port {
            raw.server.port = port;
        }
        if self.readonly {
            raw.monitor.readonly = true;
        }
        if let Some(auth) = &self.authorization {
            raw.server.authorization = auth.clone();
        }
        if let Some(ms) = self.refresh_interval_ms {
            raw.monitor.refresh_interval_ms = ms;
        }
        if let Some(ms) = self.usage_interval_ms {
            raw.monitor.usage_interval_ms = ms;
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> RelayResult<RelayConfig> {
        Self::load(Some(path.as_ref()), &ConfigOverrides::default())
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> RelayResult<RelayConfig> {
        Self::validate(Self::parse(content)?)
    }

    /// Load the optional file, apply command-line overrides, then validate
    /// the merged result. Without a file every key takes its default.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> RelayResult<RelayConfig> {
        let mut raw = match path {
            Some(path) => Self::parse(&Self::read(path)?)?,
            None => RawConfig::default(),
        };
        overrides.apply(&mut raw);
        Self::validate(raw)
    }

    fn read(path: &Path) -> RelayResult<String> {
        if !path.exists() {
            return Err(RelayError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        std::fs::read_to_string(path).map_err(|e| RelayError::Io {
            context: "reading config file",
            source: e,
        })
    }

    fn parse(content: &str) -> RelayResult<RawConfig> {
        // An empty document is a config with every default.
        if content.trim().is_empty() {
            return Ok(RawConfig::default());
        }
        serde_yaml::from_str(content).map_err(|e| RelayError::ConfigParse {
            message: format!("YAML parse error: {}", e),
        })
    }

    fn validate(raw: RawConfig) -> RelayResult<RelayConfig> {
        Ok(RelayConfig {
            daemon: Self::validate_daemon(raw.daemon)?,
            monitor: Self::validate_monitor(raw.monitor)?,
            server: Self::validate_server(raw.server)?,
            log: Self::validate_log(raw.log)?,
        })
    }

    fn validate_daemon(raw: RawDaemonConfig) -> RelayResult<DaemonConfig> {
        let home = match raw.home {
            Some(home) => expand_home(&home)?,
            None => default_pm2_home()?,
        };
        let rpc_socket = match raw.rpc_socket {
            Some(path) => expand_home(&path)?,
            None => home.join("rpc.sock"),
        };
        let pub_socket = match raw.pub_socket {
            Some(path) => expand_home(&path)?,
            None => home.join("pub.sock"),
        };

        if raw.binary.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "daemon.binary",
                value: raw.binary,
                reason: "Supervisor binary cannot be empty".to_string(),
            }
            .into());
        }

        if raw.event_poll_ms < MIN_EVENT_POLL_MS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "daemon.event_poll_ms",
                value: raw.event_poll_ms.to_string(),
                reason: format!("Must be at least {}ms", MIN_EVENT_POLL_MS),
            }
            .into());
        }

        Ok(DaemonConfig {
            home,
            rpc_socket,
            pub_socket,
            binary: raw.binary,
            event_poll_interval: Duration::from_millis(raw.event_poll_ms),
        })
    }

    fn validate_monitor(raw: RawMonitorConfig) -> RelayResult<MonitorSettings> {
        for (field, value) in [
            ("monitor.refresh_interval_ms", raw.refresh_interval_ms),
            ("monitor.usage_interval_ms", raw.usage_interval_ms),
        ] {
            if value < MIN_INTERVAL_MS {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: value.to_string(),
                    reason: format!("Must be at least {}ms", MIN_INTERVAL_MS),
                }
                .into());
            }
        }

        for (field, value) in [
            ("monitor.debounce_ms", raw.debounce_ms),
            ("monitor.idle_grace_ms", raw.idle_grace_ms),
            ("monitor.sweep_interval_ms", raw.sweep_interval_ms),
        ] {
            if value == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "Must be greater than 0".to_string(),
                }
                .into());
            }
        }

        if raw.usage_requery_every == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "monitor.usage_requery_every",
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            }
            .into());
        }

        Ok(MonitorSettings {
            refresh_interval: Duration::from_millis(raw.refresh_interval_ms),
            usage_interval: Duration::from_millis(raw.usage_interval_ms),
            usage_requery_every: raw.usage_requery_every,
            debounce: Duration::from_millis(raw.debounce_ms),
            idle_grace: Duration::from_millis(raw.idle_grace_ms),
            sweep_interval: Duration::from_millis(raw.sweep_interval_ms),
            log_tail_lines: raw.log_tail_lines,
            readonly: raw.readonly,
            max_restarts: raw.max_restarts,
        })
    }

    fn validate_server(raw: RawServerConfig) -> RelayResult<ServerConfig> {
        let port = Port::new(raw.port)?;
        let authorization = Some(raw.authorization).filter(|secret| !secret.is_empty());
        Ok(ServerConfig {
            port,
            authorization,
        })
    }

    fn validate_log(raw: RawLogConfig) -> RelayResult<LogConfig> {
        let level = raw.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "log.level",
                value: raw.level,
                reason: format!("Must be one of {}", LOG_LEVELS.join(", ")),
            }
            .into());
        }
        Ok(LogConfig { level })
    }
}

/// Supervisor home: `$PM2_HOME`, else `~/.pm2`.
fn default_pm2_home() -> RelayResult<PathBuf> {
    match std::env::var_os("PM2_HOME") {
        Some(home) if !home.is_empty() => Ok(PathBuf::from(home)),
        _ => expand_home("~/.pm2"),
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> RelayResult<PathBuf> {
    let Some(rest) = path.strip_prefix("~/") else {
        return Ok(PathBuf::from(path));
    };
    let home = std::env::var_os("HOME").ok_or_else(|| HardValidationError::MissingRequiredField {
        field: "HOME",
        context: format!("environment, needed to expand {}", path),
    })?;
    Ok(PathBuf::from(home).join(rest))
}
