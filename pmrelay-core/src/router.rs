// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Broadcast Router: fans events out to the viewers attached to a channel.
//!
//! Delivery is fire-and-forget. Each viewer owns a bounded queue; when it is
//! full the event is dropped for that viewer only. Dispatch on one channel is
//! serialized, so every viewer sees that channel's events in call order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ansi;
use crate::event::ServerEvent;
use crate::types::{Channel, SessionId};

/// Outbound queue depth per viewer.
pub const VIEWER_QUEUE_CAPACITY: usize = 256;

/// Router-side handle of one connected viewer.
#[derive(Debug)]
pub struct ViewerHandle {
    id: SessionId,
    channel: Channel,
    sender: mpsc::Sender<ServerEvent>,
    keep_ansi: AtomicBool,
}

impl ViewerHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn keep_ansi(&self) -> bool {
        self.keep_ansi.load(Ordering::Relaxed)
    }

    pub fn set_keep_ansi(&self, keep: bool) {
        self.keep_ansi.store(keep, Ordering::Relaxed);
    }

    /// Queue an event without waiting. Returns false if it was dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        let event = match event {
            ServerEvent::LogData { process_id, text } if !self.keep_ansi() => {
                ServerEvent::LogData {
                    process_id,
                    text: ansi::to_html(&text),
                }
            }
            other => other,
        };

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    session_id = %self.id,
                    channel = %self.channel,
                    event = event.name(),
                    "Viewer queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(session_id = %self.id, "Viewer already gone");
                false
            }
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterCounters {
    pub delivered: u64,
    pub dropped: u64,
    pub skipped_broadcasts: u64,
}

/// Per-channel viewer sets with serialized dispatch.
#[derive(Debug)]
pub struct BroadcastRouter {
    viewers: [DashMap<SessionId, Arc<ViewerHandle>>; Channel::COUNT],
    dispatch: [Mutex<()>; Channel::COUNT],
    next_session: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self {
            viewers: std::array::from_fn(|_| DashMap::new()),
            dispatch: std::array::from_fn(|_| Mutex::new(())),
            next_session: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Attach a new viewer; the receiver is the viewer's outbound queue.
    pub fn attach(&self, channel: Channel) -> (Arc<ViewerHandle>, mpsc::Receiver<ServerEvent>) {
        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
        let handle = Arc::new(ViewerHandle {
            id,
            channel,
            sender,
            keep_ansi: AtomicBool::new(false),
        });
        self.viewers[channel.index()].insert(id, Arc::clone(&handle));
        tracing::info!(session_id = %id, channel = %channel, "Viewer connected");
        (handle, receiver)
    }

    pub fn detach(&self, channel: Channel, id: SessionId) -> bool {
        let removed = self.viewers[channel.index()].remove(&id).is_some();
        if removed {
            tracing::info!(session_id = %id, channel = %channel, "Viewer disconnected");
        }
        removed
    }

    /// Send to every viewer of `channel`. Returns how many accepted it.
    pub fn broadcast(&self, channel: Channel, event: ServerEvent) -> usize {
        let viewers = &self.viewers[channel.index()];
        if viewers.is_empty() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                channel = %channel,
                event = event.name(),
                "No viewer attached, ignoring broadcast"
            );
            return 0;
        }

        let _order = self.lock_dispatch(channel);
        tracing::debug!(channel = %channel, event = event.name(), "Broadcasting");
        let handles: Vec<Arc<ViewerHandle>> = viewers.iter().map(|v| Arc::clone(v.value())).collect();
        self.deliver_all(handles, event)
    }

    /// Send to the listed viewers of `channel` only.
    pub fn send_to<I>(&self, channel: Channel, ids: I, event: ServerEvent) -> usize
    where
        I: IntoIterator<Item = SessionId>,
    {
        let viewers = &self.viewers[channel.index()];
        let _order = self.lock_dispatch(channel);
        let handles: Vec<Arc<ViewerHandle>> = ids
            .into_iter()
            .filter_map(|id| viewers.get(&id).map(|v| Arc::clone(v.value())))
            .collect();
        if handles.is_empty() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        self.deliver_all(handles, event)
    }

    /// Send to a single viewer.
    pub fn send(&self, channel: Channel, id: SessionId, event: ServerEvent) -> bool {
        self.send_to(channel, [id], event) == 1
    }

    pub fn viewer_count(&self, channel: Channel) -> usize {
        self.viewers[channel.index()].len()
    }

    /// Viewers connected on any channel.
    pub fn total_viewers(&self) -> usize {
        self.viewers.iter().map(DashMap::len).sum()
    }

    pub fn counters(&self) -> RouterCounters {
        RouterCounters {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            skipped_broadcasts: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn lock_dispatch(&self, channel: Channel) -> std::sync::MutexGuard<'_, ()> {
        // The guard protects no data, so a poisoned lock is still usable.
        self.dispatch[channel.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver_all(&self, handles: Vec<Arc<ViewerHandle>>, event: ServerEvent) -> usize {
        let mut delivered = 0;
        let last = handles.len().saturating_sub(1);
        let mut event = Some(event);
        for (i, handle) in handles.into_iter().enumerate() {
            let Some(next) = (if i == last { event.take() } else { event.clone() }) else {
                break;
            };
            if handle.deliver(next) {
                delivered += 1;
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}

impl Default for BroadcastRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessId;

    fn info(text: &str) -> ServerEvent {
        ServerEvent::InfoMessage(text.to_string())
    }

    #[test]
    fn test_broadcast_without_viewers_is_noop() {
        let router = BroadcastRouter::new();
        assert_eq!(router.broadcast(Channel::Processes, info("nobody")), 0);
        assert_eq!(router.counters().skipped_broadcasts, 1);
    }

    #[test]
    fn test_broadcast_reaches_only_its_channel() {
        let router = BroadcastRouter::new();
        let (_a, mut rx_a) = router.attach(Channel::Processes);
        let (_b, mut rx_b) = router.attach(Channel::Processes);
        let (_c, mut rx_c) = router.attach(Channel::System);

        assert_eq!(router.broadcast(Channel::Processes, info("one")), 2);
        assert_eq!(router.broadcast(Channel::Processes, info("two")), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap(), info("one"));
            assert_eq!(rx.try_recv().unwrap(), info("two"));
        }
        assert!(rx_c.try_recv().is_err());
        assert_eq!(router.total_viewers(), 3);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let router = BroadcastRouter::new();
        let (_slow, _rx_slow) = router.attach(Channel::System);
        let (_fast, mut rx_fast) = router.attach(Channel::System);

        for i in 0..VIEWER_QUEUE_CAPACITY {
            router.broadcast(Channel::System, info(&i.to_string()));
            rx_fast.try_recv().unwrap();
        }
        assert_eq!(router.broadcast(Channel::System, info("overflow")), 1);
        assert_eq!(rx_fast.try_recv().unwrap(), info("overflow"));
        assert_eq!(router.counters().dropped, 1);
    }

    #[test]
    fn test_scoped_send_and_detach() {
        let router = BroadcastRouter::new();
        let (a, mut rx_a) = router.attach(Channel::Log);
        let (b, mut rx_b) = router.attach(Channel::Log);

        assert!(router.send(Channel::Log, a.id(), info("for a")));
        assert_eq!(rx_a.try_recv().unwrap(), info("for a"));
        assert!(rx_b.try_recv().is_err());

        assert!(router.detach(Channel::Log, b.id()));
        assert!(!router.detach(Channel::Log, b.id()));
        assert_eq!(router.send_to(Channel::Log, [b.id()], info("gone")), 0);
    }

    #[test]
    fn test_log_text_rendered_per_viewer() {
        let router = BroadcastRouter::new();
        let (raw, mut rx_raw) = router.attach(Channel::Log);
        let (_html, mut rx_html) = router.attach(Channel::Log);
        raw.set_keep_ansi(true);

        let event = ServerEvent::LogData {
            process_id: ProcessId::new(1),
            text: "\u{1b}[31mboom\u{1b}[0m".to_string(),
        };
        router.broadcast(Channel::Log, event.clone());

        assert_eq!(rx_raw.try_recv().unwrap(), event);
        match rx_html.try_recv().unwrap() {
            ServerEvent::LogData { text, .. } => {
                assert_eq!(text, "<span style=\"color:#ff0000\">boom</span>")
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
