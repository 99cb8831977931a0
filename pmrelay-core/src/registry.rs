// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Subscription Registry.
//!
//! Tracks which viewers are interested in each (channel, process) pair and
//! owns the background work (log tail, usage sampler) serving them. Work is
//! started by the first subscriber only. When the last viewer leaves the entry
//! goes idle and keeps its work until a sweep finds it idle for the full
//! grace period, so a quick resubscribe reuses it.
//!
//! Lifecycle: absent -> active (n >= 1) -> idle (n == 0) -> absent.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::types::{Channel, ProcessId, SessionId};

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub channel: Channel,
    pub process_id: ProcessId,
}

impl SubscriptionKey {
    pub fn new(channel: Channel, process_id: ProcessId) -> Self {
        Self {
            channel,
            process_id,
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.process_id)
    }
}

/// Handle to a spawned task. Dropping it aborts the task.
#[derive(Debug)]
pub struct BackgroundWork {
    handle: AbortHandle,
}

impl BackgroundWork {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future).abort_handle(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BackgroundWork {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct Subscription {
    viewers: HashSet<SessionId>,
    idle_since: Option<Instant>,
    work: Option<BackgroundWork>,
    generation: u64,
}

/// What a subscribe call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// New entry; background work started.
    Started,
    /// Joined an active entry.
    Joined,
    /// Revived an idle entry whose work was still running.
    Resumed,
    /// The viewer was already subscribed.
    AlreadySubscribed,
}

impl SubscribeOutcome {
    /// Whether the viewer was newly added to the entry.
    pub fn is_new_viewer(&self) -> bool {
        !matches!(self, Self::AlreadySubscribed)
    }
}

/// Reference-counted subscriptions keyed by (channel, process).
#[derive(Debug)]
pub struct SubscriptionRegistry {
    entries: DashMap<SubscriptionKey, Subscription>,
    idle_grace: Duration,
    next_generation: AtomicU64,
    started: AtomicU64,
    torn_down: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(idle_grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_grace,
            next_generation: AtomicU64::new(1),
            started: AtomicU64::new(0),
            torn_down: AtomicU64::new(0),
        }
    }

    /// Add `session` to the subscription for `key`.
    ///
    /// `start` runs only when no entry exists. It receives the entry's
    /// generation, which `fail` needs later. It must not call back into the
    /// registry synchronously.
    pub fn subscribe<F>(&self, key: SubscriptionKey, session: SessionId, start: F) -> SubscribeOutcome
    where
        F: FnOnce(u64) -> BackgroundWork,
    {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let sub = occupied.get_mut();
                let was_idle = sub.viewers.is_empty();
                if !sub.viewers.insert(session) {
                    tracing::debug!(key = %key, session_id = %session, "Already subscribed");
                    return SubscribeOutcome::AlreadySubscribed;
                }
                if was_idle {
                    sub.idle_since = None;
                    tracing::info!(key = %key, session_id = %session, "Idle subscription resumed");
                    SubscribeOutcome::Resumed
                } else {
                    tracing::debug!(
                        key = %key,
                        session_id = %session,
                        viewers = sub.viewers.len(),
                        "Joined subscription"
                    );
                    SubscribeOutcome::Joined
                }
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let work = start(generation);
                vacant.insert(Subscription {
                    viewers: HashSet::from([session]),
                    idle_since: None,
                    work: Some(work),
                    generation,
                });
                self.started.fetch_add(1, Ordering::Relaxed);
                tracing::info!(key = %key, session_id = %session, "Subscription started");
                SubscribeOutcome::Started
            }
        }
    }

    /// Remove `session`. An entry left without viewers goes idle; its work
    /// keeps running until a sweep tears it down.
    pub fn unsubscribe(&self, key: SubscriptionKey, session: SessionId) -> bool {
        let Some(mut sub) = self.entries.get_mut(&key) else {
            return false;
        };
        if !sub.viewers.remove(&session) {
            return false;
        }
        if sub.viewers.is_empty() {
            sub.idle_since = Some(Instant::now());
            tracing::debug!(key = %key, "Subscription idle");
        }
        true
    }

    /// Tear down every entry idle for at least the grace period.
    pub fn sweep(&self) -> Vec<SubscriptionKey> {
        let now = Instant::now();
        let grace = self.idle_grace;
        let mut removed = Vec::new();

        self.entries.retain(|key, sub| {
            let expired = sub
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace);
            if expired {
                removed.push(*key);
            }
            !expired
        });

        for key in &removed {
            self.torn_down.fetch_add(1, Ordering::Relaxed);
            tracing::info!(key = %key, "Idle subscription torn down");
        }
        removed
    }

    /// Tear down the entry immediately after its work failed.
    ///
    /// Only removes the entry created with `generation`, so a stale failure
    /// never kills a newer subscription. Returns the viewers that were
    /// interested.
    pub fn fail(&self, key: SubscriptionKey, generation: u64) -> Option<Vec<SessionId>> {
        let (_, sub) = self
            .entries
            .remove_if(&key, |_, sub| sub.generation == generation)?;
        self.torn_down.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(key = %key, "Subscription torn down after failure");
        Some(sub.viewers.into_iter().collect())
    }

    /// Current viewers of `key`.
    pub fn viewers(&self, key: SubscriptionKey) -> Vec<SessionId> {
        self.entries
            .get(&key)
            .map(|sub| sub.viewers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn viewer_count(&self, key: SubscriptionKey) -> usize {
        self.entries.get(&key).map_or(0, |sub| sub.viewers.len())
    }

    pub fn contains(&self, key: SubscriptionKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn is_idle(&self, key: SubscriptionKey) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|sub| sub.idle_since.is_some())
    }

    /// Whether the entry still holds running background work.
    pub fn has_running_work(&self, key: SubscriptionKey) -> bool {
        self.entries.get(&key).is_some_and(|sub| {
            sub.work
                .as_ref()
                .is_some_and(|work| !work.is_finished())
        })
    }

    /// Entries on `channel`, idle ones included.
    pub fn count(&self, channel: Channel) -> usize {
        self.entries.iter().filter(|e| e.key().channel == channel).count()
    }

    /// Entries on `channel` whose background work is still running.
    pub fn running_work(&self, channel: Channel) -> usize {
        self.entries
            .iter()
            .filter(|e| e.key().channel == channel)
            .filter(|e| e.work.as_ref().is_some_and(|work| !work.is_finished()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscriptions started and torn down since creation.
    pub fn lifetime_counts(&self) -> (u64, u64) {
        (
            self.started.load(Ordering::Relaxed),
            self.torn_down.load(Ordering::Relaxed),
        )
    }

    /// Drop every entry and its work.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            tracing::info!(count = count, "All subscriptions torn down");
        }
    }
}
