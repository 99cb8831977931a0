//! pmrelay Core Library
//!
//! Monitoring and relay engine for a PM2 process supervisor. Polls the
//! daemon, caches process and host snapshots, and fans them out to viewers
//! over four channels (system, processes, log, usage). Also proxies control
//! actions back to the daemon and runs per-process log tails and usage
//! samplers on demand.

pub mod action;
pub mod ansi;
pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod monitor;
pub mod process;
pub mod registry;
pub mod router;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod supervisor;
pub mod system;
pub mod tail;
pub mod throttle;
pub mod types;
pub mod usage;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use action::{ActionProxy, ActionReport};
pub use config::{ConfigLoader, ConfigOverrides, MonitorSettings, RelayConfig};
pub use error::{HardValidationError, RelayError, RelayResult, SupervisorError};
pub use event::{ClientRequest, ServerEvent};
pub use monitor::Monitor;
pub use process::{ProcessRecord, ProcessStatus, RawProcess};
pub use registry::{SubscriptionKey, SubscriptionRegistry};
pub use router::BroadcastRouter;
pub use session::ViewerSession;
pub use stats::RelayStats;
pub use supervisor::{LogPaths, Pm2Client, SupervisorClient, SupervisorEvent};
pub use system::{HostProbe, SystemProbe, SystemStats};
pub use types::{ActionTarget, Channel, Port, ProcessAction, ProcessId, SessionId};
