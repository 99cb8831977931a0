// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! One connected viewer.
//!
//! A session accepts requests valid on its channel, remembers what it
//! subscribed to and releases all of it when dropped.

use std::collections::HashSet;
use std::sync::Arc;

use crate::event::ClientRequest;
use crate::monitor::Monitor;
use crate::registry::SubscriptionKey;
use crate::router::ViewerHandle;
use crate::supervisor::SupervisorClient;
use crate::system::SystemProbe;
use crate::types::{Channel, SessionId};

pub struct ViewerSession<C: SupervisorClient, P: SystemProbe> {
    monitor: Arc<Monitor<C, P>>,
    handle: Arc<ViewerHandle>,
    resources: HashSet<SubscriptionKey>,
}

impl<C: SupervisorClient, P: SystemProbe> ViewerSession<C, P> {
    pub(crate) fn new(monitor: Arc<Monitor<C, P>>, handle: Arc<ViewerHandle>) -> Self {
        Self {
            monitor,
            handle,
            resources: HashSet::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn channel(&self) -> Channel {
        self.handle.channel()
    }

    /// Keys this session is subscribed to.
    pub fn resources(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.resources.iter()
    }

    /// Apply one request. Requests for another channel are ignored.
    pub fn handle(&mut self, request: ClientRequest) {
        if request.channel() != self.channel() {
            tracing::debug!(
                session_id = %self.id(),
                channel = %self.channel(),
                request = request.name(),
                "Request not accepted on this channel"
            );
            return;
        }

        let session = self.id();
        match request {
            ClientRequest::RequestAction { action, target_id } => {
                tracing::info!(session_id = %session, action = %action, target = %target_id, "Action requested");
                let monitor = Arc::clone(&self.monitor);
                tokio::spawn(async move {
                    monitor.run_action(session, action, target_id).await;
                });
            }
            ClientRequest::PullProcesses => {
                if !self.monitor.send_processes(session) {
                    self.monitor.request_refresh();
                }
            }
            ClientRequest::SubscribeLog {
                process_id,
                keep_ansi,
            } => {
                self.handle.set_keep_ansi(keep_ansi);
                self.monitor.subscribe_log(session, process_id);
                self.resources
                    .insert(SubscriptionKey::new(Channel::Log, process_id));
            }
            ClientRequest::SubscribeUsage { process_id } => {
                self.monitor.subscribe_usage(session, process_id);
                self.resources
                    .insert(SubscriptionKey::new(Channel::Usage, process_id));
            }
            ClientRequest::UnsubscribeLog { process_id } => {
                self.release(SubscriptionKey::new(Channel::Log, process_id));
            }
            ClientRequest::UnsubscribeUsage { process_id } => {
                self.release(SubscriptionKey::new(Channel::Usage, process_id));
            }
        }
    }

    /// Parse and apply a JSON request. Malformed input is logged and dropped.
    pub fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => self.handle(request),
            Err(e) => {
                tracing::warn!(session_id = %self.id(), error = %e, "Malformed viewer request");
            }
        }
    }

    fn release(&mut self, key: SubscriptionKey) {
        self.resources.remove(&key);
        self.monitor.unsubscribe(key, self.id());
    }
}

impl<C: SupervisorClient, P: SystemProbe> Drop for ViewerSession<C, P> {
    fn drop(&mut self) {
        let session = self.id();
        for key in self.resources.drain() {
            self.monitor.unsubscribe(key, session);
        }
        self.monitor.detach(self.handle.channel(), session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::MonitorSettings;
    use crate::event::ServerEvent;
    use crate::process::ProcessStatus;
    use crate::testing::{raw_process, FakeSupervisor, FixedProbe};
    use crate::types::{ActionTarget, ProcessAction, ProcessId};

    fn monitor(readonly: bool) -> Arc<Monitor<FakeSupervisor, FixedProbe>> {
        let settings = MonitorSettings {
            readonly,
            ..MonitorSettings::default()
        };
        Monitor::new(
            settings,
            FakeSupervisor::with_processes(vec![
                raw_process(0, ProcessStatus::Online),
                raw_process(1, ProcessStatus::Stopped),
            ]),
            FixedProbe::with_pids([1000]),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_on_wrong_channel_ignored() {
        let monitor = monitor(false);
        let (mut session, _rx) = monitor.connect(Channel::Processes);

        session.handle(ClientRequest::SubscribeUsage {
            process_id: ProcessId::new(0),
        });
        assert_eq!(session.resources().count(), 0);
        assert!(monitor.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_subscriptions() {
        let monitor = monitor(false);
        let (mut session, _rx) = monitor.connect(Channel::Usage);
        let key = SubscriptionKey::new(Channel::Usage, ProcessId::new(0));

        session.handle_text(r#"{"request":"subscribeUsage","processId":0}"#);
        assert_eq!(monitor.registry().viewer_count(key), 1);
        assert_eq!(monitor.router().viewer_count(Channel::Usage), 1);

        drop(session);
        assert!(monitor.registry().is_idle(key));
        assert_eq!(monitor.router().viewer_count(Channel::Usage), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_request_ignored() {
        let monitor = monitor(false);
        let (mut session, _rx) = monitor.connect(Channel::Log);
        session.handle_text("{not json");
        session.handle_text(r#"{"request":"subscribeLog"}"#);
        assert!(monitor.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readonly_action_reported_to_requester_only() {
        let monitor = monitor(true);
        let (mut requester, mut rx) = monitor.connect(Channel::System);
        let (_other, mut other_rx) = monitor.connect(Channel::System);

        requester.handle(ClientRequest::RequestAction {
            action: ProcessAction::Stop,
            target_id: ActionTarget::One(ProcessId::new(7)),
        });

        let result = loop {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(ServerEvent::ActionResult { error, .. })) => break error,
                Ok(Some(_)) => continue,
                other => panic!("no action result: {:?}", other),
            }
        };
        assert!(result.unwrap().contains("readonly"));
        assert!(monitor.client().actions().is_empty());

        while let Ok(event) = other_rx.try_recv() {
            assert!(!matches!(event, ServerEvent::ActionResult { .. }));
        }
    }
}
