// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and small closed enums shared by every component.
//!
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ActionError, HardValidationError};

/// Supervisor-assigned process identifier (`pm_id`).
/// Stable per supervised process instance; scopes log and usage subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ActionError::InvalidTarget {
                value: s.to_string(),
            })
    }
}

/// Identifier of one viewer connection on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// Logical channels a viewer connects to independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    System,
    Processes,
    Log,
    Usage,
}

impl Channel {
    pub const COUNT: usize = 4;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::System,
        Channel::Processes,
        Channel::Log,
        Channel::Usage,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Processes => "processes",
            Self::Log => "log",
            Self::Usage => "usage",
        }
    }

    pub(crate) const fn index(&self) -> usize {
        match self {
            Self::System => 0,
            Self::Processes => 1,
            Self::Log => 2,
            Self::Usage => 3,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Channel {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| HardValidationError::InvalidFieldValue {
                field: "channel",
                value: s.to_string(),
                reason: "expected one of system, processes, log, usage".to_string(),
            })
    }
}

/// Control actions a viewer may proxy to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessAction {
    Restart,
    Stop,
    Save,
    Delete,
}

impl ProcessAction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Stop => "stop",
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }

    /// Whether the action applies to the whole daemon rather than one process.
    pub const fn is_daemon_wide(&self) -> bool {
        matches!(self, Self::Save)
    }
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ProcessAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(Self::Restart),
            "stop" => Ok(Self::Stop),
            "save" => Ok(Self::Save),
            "delete" => Ok(Self::Delete),
            other => Err(ActionError::UnknownAction {
                name: other.to_string(),
            }),
        }
    }
}

/// Target of an action: one process, or every known process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTarget {
    One(ProcessId),
    All,
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(id) => write!(f, "{}", id),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for ActionTarget {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "all" {
            return Ok(Self::All);
        }
        s.parse().map(Self::One)
    }
}

impl Serialize for ActionTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::One(id) => serializer.serialize_u32(id.value()),
            Self::All => serializer.serialize_str("all"),
        }
    }
}

impl<'de> Deserialize<'de> for ActionTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Viewers send either a bare pm_id or a string ("7", "all").
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Id(u32),
            Text(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Id(id) => Ok(Self::One(ProcessId::new(id))),
            Wire::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_target_parse() {
        assert_eq!("all".parse::<ActionTarget>().unwrap(), ActionTarget::All);
        assert_eq!(
            "7".parse::<ActionTarget>().unwrap(),
            ActionTarget::One(ProcessId::new(7))
        );
        assert!("seven".parse::<ActionTarget>().is_err());
    }

    #[test]
    fn test_action_target_wire_forms() {
        let from_number: ActionTarget = serde_json::from_str("3").unwrap();
        let from_string: ActionTarget = serde_json::from_str("\"3\"").unwrap();
        let all: ActionTarget = serde_json::from_str("\"all\"").unwrap();

        assert_eq!(from_number, ActionTarget::One(ProcessId::new(3)));
        assert_eq!(from_string, from_number);
        assert_eq!(all, ActionTarget::All);
        assert_eq!(serde_json::to_string(&all).unwrap(), "\"all\"");
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!("reload".parse::<ProcessAction>().is_err());
        assert_eq!("delete".parse::<ProcessAction>().unwrap(), ProcessAction::Delete);
    }

    #[test]
    fn test_channel_names_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(channel.name().parse::<Channel>().unwrap(), channel);
        }
        assert!("proccess".parse::<Channel>().is_err());
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(Port::new(0).is_err());
        assert_eq!(Port::new(8088).unwrap().value(), 8088);
    }
}
