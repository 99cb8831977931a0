// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The monitor engine.
//!
//! `Monitor` owns every component and wires the flows between them:
//!
//! ```text
//! supervisor bus -> throttler -> snapshot refresh -> router -> processes viewers
//! viewer action  -> action proxy -> supervisor (-> throttler when no bus event follows)
//! heartbeat      -> host stats   -> router -> system viewers
//! ```
//!
//! Long-running tasks hold only a `Weak` reference, so dropping the last
//! `Arc<Monitor>` (or calling `shutdown`) stops them. The supervisor event
//! subscription is held only while at least one viewer is connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::action::{failure_message, ActionProxy, ActionReport};
use crate::config::MonitorSettings;
use crate::error::TailError;
use crate::event::ServerEvent;
use crate::heartbeat::Heartbeat;
use crate::registry::{BackgroundWork, SubscribeOutcome, SubscriptionKey, SubscriptionRegistry};
use crate::router::BroadcastRouter;
use crate::session::ViewerSession;
use crate::snapshot::SnapshotStore;
use crate::stats::{ChannelCounts, RelayStats};
use crate::supervisor::{SupervisorClient, SupervisorEvent};
use crate::system::SystemProbe;
use crate::throttle::RefreshThrottler;
use crate::types::{ActionTarget, Channel, ProcessAction, ProcessId, SessionId};
use crate::usage::UsageSampler;

/// Version reported when the daemon cannot tell.
pub const UNKNOWN_VERSION: &str = "0.0.0";

/// Delay before re-subscribing to a lost or unavailable event bus.
const EVENT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(3);

pub struct Monitor<C: SupervisorClient, P: SystemProbe> {
    settings: MonitorSettings,
    client: C,
    probe: P,
    store: SnapshotStore,
    throttler: RefreshThrottler,
    registry: SubscriptionRegistry,
    router: BroadcastRouter,
    heartbeat: Heartbeat,
    actions: ActionProxy,
    tasks: Mutex<Vec<AbortHandle>>,
    viewers_changed: Arc<Notify>,
    stopped: AtomicBool,
}

impl<C: SupervisorClient, P: SystemProbe> Monitor<C, P> {
    pub fn new(settings: MonitorSettings, client: C, probe: P) -> Arc<Self> {
        Arc::new(Self {
            store: SnapshotStore::new(),
            throttler: RefreshThrottler::new(settings.debounce),
            registry: SubscriptionRegistry::new(settings.idle_grace),
            router: BroadcastRouter::new(),
            heartbeat: Heartbeat::new(settings.refresh_interval),
            actions: ActionProxy::new(settings.readonly),
            tasks: Mutex::new(Vec::new()),
            viewers_changed: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
            settings,
            client,
            probe,
        })
    }

    /// Start the event pump and the idle sweep, and request a first refresh.
    pub fn start(self: &Arc<Self>) {
        let pump = tokio::spawn(Self::pump_events(
            Arc::downgrade(self),
            Arc::clone(&self.viewers_changed),
        ));
        let sweep = tokio::spawn(Self::sweep_loop(
            Arc::downgrade(self),
            self.settings.sweep_interval,
        ));
        self.task_list().extend([pump.abort_handle(), sweep.abort_handle()]);

        tracing::info!(
            readonly = self.settings.readonly,
            refresh_ms = self.settings.refresh_interval.as_millis() as u64,
            usage_ms = self.settings.usage_interval.as_millis() as u64,
            max_restarts = self.settings.max_restarts,
            "Monitor started"
        );
        self.request_refresh();
    }

    /// Stop background loops, timers, tails and samplers.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.task_list().drain(..) {
            task.abort();
        }
        self.throttler.cancel();
        self.heartbeat.stop();
        self.registry.clear();
        tracing::info!("Monitor shut down");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ask for a coalesced process refresh.
    pub fn request_refresh(self: &Arc<Self>) -> bool {
        if self.is_stopped() {
            return false;
        }
        let weak = Arc::downgrade(self);
        self.throttler.request(move || async move {
            if let Some(monitor) = weak.upgrade() {
                let _ = monitor
                    .store
                    .refresh_processes(&monitor.client, &monitor.router)
                    .await;
            }
        })
    }

    /// Attach a viewer to `channel`.
    ///
    /// Processes viewers get the cached list straight away; system viewers
    /// get the cached host stats and the daemon version. The heartbeat is
    /// started if it is not running.
    pub fn connect(
        self: &Arc<Self>,
        channel: Channel,
    ) -> (ViewerSession<C, P>, mpsc::Receiver<ServerEvent>) {
        let (handle, receiver) = self.router.attach(channel);
        let id = handle.id();
        self.viewers_changed.notify_waiters();

        match channel {
            Channel::Processes => {
                if !self.send_processes(id) {
                    self.request_refresh();
                }
            }
            Channel::System => {
                if let Some(stats) = self.store.system_stats() {
                    self.router.send(channel, id, ServerEvent::SystemStats(stats));
                }
                let monitor = Arc::clone(self);
                tokio::spawn(async move {
                    let version = monitor.version().await;
                    monitor
                        .router
                        .send(Channel::System, id, ServerEvent::VersionInfo(version));
                });
            }
            Channel::Log | Channel::Usage => {}
        }

        self.ensure_heartbeat();
        (ViewerSession::new(Arc::clone(self), handle), receiver)
    }

    /// Send the cached process list to one processes viewer.
    pub fn send_processes(&self, session: SessionId) -> bool {
        match self.store.processes() {
            Some(list) => self
                .router
                .send(Channel::Processes, session, ServerEvent::ProcessList(list)),
            None => false,
        }
    }

    /// Daemon version, `0.0.0` when it cannot be fetched.
    pub async fn version(&self) -> String {
        match self.client.version().await {
            Ok(version) if !version.is_empty() => version,
            Ok(_) => UNKNOWN_VERSION.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Version unavailable");
                UNKNOWN_VERSION.to_string()
            }
        }
    }

    /// Run an action for `session` and report each outcome back to it.
    pub async fn run_action(
        self: &Arc<Self>,
        session: SessionId,
        action: ProcessAction,
        target: ActionTarget,
    ) -> Option<ActionReport> {
        match self.actions.execute(&self.client, action, target).await {
            Ok(report) => {
                for outcome in &report.outcomes {
                    self.router.send(
                        Channel::System,
                        session,
                        ServerEvent::ActionResult {
                            action,
                            target_id: ActionTarget::One(outcome.process_id),
                            error: outcome.error.clone(),
                        },
                    );
                }
                if report.force_refresh {
                    tracing::debug!(action = %action, target = %target, "Forcing refresh");
                    self.request_refresh();
                }
                Some(report)
            }
            Err(e) => {
                self.router.send(
                    Channel::System,
                    session,
                    ServerEvent::ActionResult {
                        action,
                        target_id: target,
                        error: Some(failure_message(action, &e)),
                    },
                );
                None
            }
        }
    }

    /// Add `session` to the log subscription of `process_id`, spawning the
    /// tail if nobody else is following it.
    pub fn subscribe_log(
        self: &Arc<Self>,
        session: SessionId,
        process_id: ProcessId,
    ) -> SubscribeOutcome {
        let key = SubscriptionKey::new(Channel::Log, process_id);
        if !self.registry.viewers(key).contains(&session) {
            self.router.send(
                Channel::Log,
                session,
                ServerEvent::LogData {
                    process_id,
                    text: waiting_banner(),
                },
            );
        }

        let weak = Arc::downgrade(self);
        self.registry.subscribe(key, session, move |generation| {
            BackgroundWork::spawn(Self::follow_log(weak, key, generation))
        })
    }

    /// Add `session` to the usage subscription of `process_id`, starting the
    /// sampler if nobody else is watching it.
    pub fn subscribe_usage(
        self: &Arc<Self>,
        session: SessionId,
        process_id: ProcessId,
    ) -> SubscribeOutcome {
        let key = SubscriptionKey::new(Channel::Usage, process_id);
        let weak = Arc::downgrade(self);
        self.registry.subscribe(key, session, move |generation| {
            BackgroundWork::spawn(Self::sample_usage(weak, key, generation))
        })
    }

    pub fn unsubscribe(&self, key: SubscriptionKey, session: SessionId) -> bool {
        self.registry.unsubscribe(key, session)
    }

    pub(crate) fn detach(&self, channel: Channel, session: SessionId) {
        self.router.detach(channel, session);
        self.viewers_changed.notify_waiters();
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn stats(&self) -> RelayStats {
        let (refreshes, refresh_failures) = self.store.refresh_counts();
        let (refresh_requests, refresh_timers) = self.throttler.counts();
        let (subscriptions_started, subscriptions_torn_down) = self.registry.lifetime_counts();
        let (actions_executed, actions_rejected) = self.actions.counts();
        let router = self.router.counters();

        RelayStats {
            viewers: ChannelCounts::from_fn(|channel| self.router.viewer_count(channel)),
            subscriptions: ChannelCounts::from_fn(|channel| self.registry.count(channel)),
            running_tails: self.registry.running_work(Channel::Log),
            running_samplers: self.registry.running_work(Channel::Usage),
            subscriptions_started,
            subscriptions_torn_down,
            process_count: self.store.processes().map(|list| list.len()),
            refreshes,
            refresh_failures,
            refresh_requests,
            refresh_timers,
            events_delivered: router.delivered,
            events_dropped: router.dropped,
            broadcasts_skipped: router.skipped_broadcasts,
            actions_executed,
            actions_rejected,
            heartbeat_running: self.heartbeat.is_running(),
            heartbeat_ticks: self.heartbeat.ticks(),
        }
    }

    fn ensure_heartbeat(self: &Arc<Self>) {
        let for_tick = Arc::downgrade(self);
        let for_active = Arc::downgrade(self);
        self.heartbeat.start(
            move || {
                let weak = for_tick.clone();
                async move {
                    if let Some(monitor) = weak.upgrade() {
                        monitor
                            .store
                            .refresh_system_stats(&monitor.probe, &monitor.router)
                            .await;
                    }
                }
            },
            move || {
                for_active
                    .upgrade()
                    .is_some_and(|monitor| !monitor.is_stopped() && monitor.router.total_viewers() > 0)
            },
        );
    }

    fn on_supervisor_event(self: &Arc<Self>, event: SupervisorEvent) {
        let (id, name) = event.process();
        tracing::info!(event = event.name(), process = %format!("{}-{}", name, id), "Supervisor event");
        self.request_refresh();
    }

    async fn pump_events(weak: Weak<Self>, viewers_changed: Arc<Notify>) {
        'pump: loop {
            if !Self::wait_for_viewers(&weak, &viewers_changed).await {
                return;
            }
            let Some(monitor) = weak.upgrade() else {
                return;
            };
            let subscription = monitor.client.subscribe_events().await;
            drop(monitor);

            match subscription {
                Ok(mut events) => {
                    // Changes made while unsubscribed produced no event.
                    if let Some(monitor) = weak.upgrade() {
                        monitor.request_refresh();
                    }
                    loop {
                        let changed = viewers_changed.notified();
                        tokio::pin!(changed);
                        changed.as_mut().enable();

                        let Some(monitor) = weak.upgrade() else {
                            return;
                        };
                        if monitor.router.total_viewers() == 0 {
                            tracing::debug!("No viewers, pausing supervisor event bus");
                            continue 'pump;
                        }
                        drop(monitor);

                        tokio::select! {
                            event = events.recv() => {
                                let Some(event) = event else {
                                    break;
                                };
                                let Some(monitor) = weak.upgrade() else {
                                    return;
                                };
                                monitor.on_supervisor_event(event);
                            }
                            _ = &mut changed => {}
                        }
                    }
                    tracing::warn!("Supervisor event bus closed, resubscribing");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot subscribe to supervisor events, retrying");
                }
            }

            tokio::time::sleep(EVENT_RESUBSCRIBE_DELAY).await;
            // The daemon may have come back; pick up whatever changed meanwhile.
            if let Some(monitor) = weak.upgrade() {
                monitor.request_refresh();
            }
        }
    }

    /// Wait until at least one viewer is connected. `false` once the monitor is gone.
    async fn wait_for_viewers(weak: &Weak<Self>, viewers_changed: &Notify) -> bool {
        loop {
            let changed = viewers_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match weak.upgrade() {
                Some(monitor) if monitor.router.total_viewers() > 0 => return true,
                Some(_) => {}
                None => return false,
            }
            changed.await;
        }
    }

    async fn sweep_loop(weak: Weak<Self>, period: Duration) {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(monitor) = weak.upgrade() else {
                return;
            };
            let removed = monitor.registry.sweep();
            if !removed.is_empty() {
                tracing::debug!(count = removed.len(), "Idle sweep");
            }
        }
    }

    async fn follow_log(weak: Weak<Self>, key: SubscriptionKey, generation: u64) {
        let Some(monitor) = weak.upgrade() else {
            return;
        };
        let process_id = key.process_id;
        let started = monitor
            .client
            .tail_log(process_id, monitor.settings.log_tail_lines)
            .await;
        let mut tail = match started {
            Ok(tail) => tail,
            Err(e) => {
                monitor.fail_subscription(key, generation, &e);
                return;
            }
        };
        drop(monitor);
        tracing::info!(process_id = %process_id, "Log tail running");

        while let Some(batch) = tail.next_batch().await {
            let Some(monitor) = weak.upgrade() else {
                return;
            };
            let viewers = monitor.registry.viewers(key);
            if viewers.is_empty() {
                continue;
            }
            monitor.router.send_to(
                Channel::Log,
                viewers,
                ServerEvent::LogData {
                    process_id,
                    text: batch.join("\n"),
                },
            );
        }

        if let Some(monitor) = weak.upgrade() {
            monitor.fail_subscription(key, generation, &TailError::Ended { id: process_id });
        }
    }

    async fn sample_usage(weak: Weak<Self>, key: SubscriptionKey, generation: u64) {
        let Some((period, requery_every)) = weak
            .upgrade()
            .map(|m| (m.settings.usage_interval, m.settings.usage_requery_every))
        else {
            return;
        };
        let mut sampler = UsageSampler::new(key.process_id, requery_every);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(process_id = %key.process_id, "Usage sampler running");

        loop {
            interval.tick().await;
            let Some(monitor) = weak.upgrade() else {
                return;
            };
            match sampler.sample(&monitor.client, &monitor.probe).await {
                Ok(event) => {
                    let viewers = monitor.registry.viewers(key);
                    if !viewers.is_empty() {
                        monitor.router.send_to(Channel::Usage, viewers, event);
                    }
                }
                Err(e) => {
                    monitor.fail_subscription(key, generation, &e);
                    return;
                }
            }
        }
    }

    /// Tear the subscription down now and tell its viewers why.
    fn fail_subscription(&self, key: SubscriptionKey, generation: u64, cause: &dyn std::fmt::Display) {
        tracing::warn!(key = %key, error = %cause, "Background work failed");
        let Some(viewers) = self.registry.fail(key, generation) else {
            return;
        };
        let message = format!("Error: {}", cause);
        let event = match key.channel {
            Channel::Log => ServerEvent::LogError {
                process_id: key.process_id,
                message,
            },
            _ => ServerEvent::UsageError {
                process_id: key.process_id,
                message,
            },
        };
        self.router.send_to(key.channel, viewers, event);
    }

    fn task_list(&self) -> std::sync::MutexGuard<'_, Vec<AbortHandle>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: SupervisorClient, P: SystemProbe> Drop for Monitor<C, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// First line a log viewer sees.
pub fn waiting_banner() -> String {
    format!(
        "[{}] waiting for logs...",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}
