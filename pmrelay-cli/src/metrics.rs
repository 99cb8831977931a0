// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Prometheus export of relay statistics.
//!
//! Gauges are refreshed from `RelayStats` at scrape time.

use lazy_static::lazy_static;
use prometheus::{register_int_gauge, register_int_gauge_vec, IntGauge, IntGaugeVec};

use pmrelay_core::{Channel, RelayStats};

lazy_static! {
    pub static ref VIEWERS: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_viewers",
        "Connected viewers per channel",
        &["channel"]
    )
    .unwrap();
    pub static ref SUBSCRIPTIONS: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_subscriptions",
        "Live subscriptions per channel, idle ones included",
        &["channel"]
    )
    .unwrap();
    pub static ref RUNNING_WORKERS: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_running_workers",
        "Log tails and usage samplers currently running",
        &["kind"]
    )
    .unwrap();
    pub static ref SUBSCRIPTION_LIFECYCLE: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_subscription_lifecycle",
        "Subscriptions started and torn down since startup",
        &["stage"]
    )
    .unwrap();
    pub static ref PROCESSES: IntGauge = register_int_gauge!(
        "pmrelay_processes",
        "Processes in the cached snapshot"
    )
    .unwrap();
    pub static ref REFRESHES: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_refreshes",
        "Process refreshes attempted and failed since startup",
        &["outcome"]
    )
    .unwrap();
    pub static ref REFRESH_TRIGGERS: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_refresh_triggers",
        "Refresh triggers received and timers scheduled since startup",
        &["stage"]
    )
    .unwrap();
    pub static ref EVENTS: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_events",
        "Events delivered and dropped, broadcasts skipped, since startup",
        &["outcome"]
    )
    .unwrap();
    pub static ref ACTIONS: IntGaugeVec = register_int_gauge_vec!(
        "pmrelay_actions",
        "Control actions executed and rejected since startup",
        &["outcome"]
    )
    .unwrap();
    pub static ref HEARTBEAT_RUNNING: IntGauge = register_int_gauge!(
        "pmrelay_heartbeat_running",
        "Whether the host stats heartbeat is running"
    )
    .unwrap();
    pub static ref HEARTBEAT_TICKS: IntGauge = register_int_gauge!(
        "pmrelay_heartbeat_ticks",
        "Heartbeat iterations since startup"
    )
    .unwrap();
}

/// Force registration so every metric appears on the first scrape.
pub fn init() {
    lazy_static::initialize(&VIEWERS);
    lazy_static::initialize(&SUBSCRIPTIONS);
    lazy_static::initialize(&RUNNING_WORKERS);
    lazy_static::initialize(&SUBSCRIPTION_LIFECYCLE);
    lazy_static::initialize(&PROCESSES);
    lazy_static::initialize(&REFRESHES);
    lazy_static::initialize(&REFRESH_TRIGGERS);
    lazy_static::initialize(&EVENTS);
    lazy_static::initialize(&ACTIONS);
    lazy_static::initialize(&HEARTBEAT_RUNNING);
    lazy_static::initialize(&HEARTBEAT_TICKS);
}

pub fn record(stats: &RelayStats) {
    for channel in Channel::ALL {
        VIEWERS
            .with_label_values(&[channel.name()])
            .set(stats.viewers.get(channel) as i64);
        SUBSCRIPTIONS
            .with_label_values(&[channel.name()])
            .set(stats.subscriptions.get(channel) as i64);
    }
    RUNNING_WORKERS
        .with_label_values(&["log_tail"])
        .set(stats.running_tails as i64);
    RUNNING_WORKERS
        .with_label_values(&["usage_sampler"])
        .set(stats.running_samplers as i64);
    SUBSCRIPTION_LIFECYCLE
        .with_label_values(&["started"])
        .set(stats.subscriptions_started as i64);
    SUBSCRIPTION_LIFECYCLE
        .with_label_values(&["torn_down"])
        .set(stats.subscriptions_torn_down as i64);
    PROCESSES.set(stats.process_count.unwrap_or(0) as i64);
    REFRESHES
        .with_label_values(&["attempted"])
        .set(stats.refreshes as i64);
    REFRESHES
        .with_label_values(&["failed"])
        .set(stats.refresh_failures as i64);
    REFRESH_TRIGGERS
        .with_label_values(&["requested"])
        .set(stats.refresh_requests as i64);
    REFRESH_TRIGGERS
        .with_label_values(&["scheduled"])
        .set(stats.refresh_timers as i64);
    EVENTS
        .with_label_values(&["delivered"])
        .set(stats.events_delivered as i64);
    EVENTS
        .with_label_values(&["dropped"])
        .set(stats.events_dropped as i64);
    EVENTS
        .with_label_values(&["skipped"])
        .set(stats.broadcasts_skipped as i64);
    ACTIONS
        .with_label_values(&["executed"])
        .set(stats.actions_executed as i64);
    ACTIONS
        .with_label_values(&["rejected"])
        .set(stats.actions_rejected as i64);
    HEARTBEAT_RUNNING.set(i64::from(stats.heartbeat_running));
    HEARTBEAT_TICKS.set(stats.heartbeat_ticks as i64);
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}
