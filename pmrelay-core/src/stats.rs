// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

use serde::{Deserialize, Serialize};

use crate::types::Channel;

/// Point-in-time runtime statistics of a running monitor.
/// Served as JSON and mirrored into prometheus gauges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    pub viewers: ChannelCounts,
    pub subscriptions: ChannelCounts,
    pub running_tails: usize,
    pub running_samplers: usize,
    pub subscriptions_started: u64,
    pub subscriptions_torn_down: u64,
    pub process_count: Option<usize>,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub refresh_requests: u64,
    pub refresh_timers: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub broadcasts_skipped: u64,
    pub actions_executed: u64,
    pub actions_rejected: u64,
    pub heartbeat_running: bool,
    pub heartbeat_ticks: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub system: usize,
    pub processes: usize,
    pub log: usize,
    pub usage: usize,
}

impl ChannelCounts {
    pub fn from_fn(mut count: impl FnMut(Channel) -> usize) -> Self {
        Self {
            system: count(Channel::System),
            processes: count(Channel::Processes),
            log: count(Channel::Log),
            usage: count(Channel::Usage),
        }
    }

    pub fn get(&self, channel: Channel) -> usize {
        match channel {
            Channel::System => self.system,
            Channel::Processes => self.processes,
            Channel::Log => self.log,
            Channel::Usage => self.usage,
        }
    }

    pub fn total(&self) -> usize {
        self.system + self.processes + self.log + self.usage
    }
}
