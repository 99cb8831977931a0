// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Refresh Throttler.
//!
//! Coalesces bursts of refresh triggers into one refresh per debounce window.
//! A trigger while a timer is pending is a no-op; the window is never
//! extended. The pending flag is cleared before the refresh runs, so a trigger
//! arriving mid-refresh opens a fresh window instead of being lost.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

#[derive(Debug)]
pub struct RefreshThrottler {
    window: Duration,
    pending: Arc<AtomicBool>,
    timer: Mutex<Option<AbortHandle>>,
    requested: AtomicU64,
    scheduled: AtomicU64,
}

impl RefreshThrottler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
            requested: AtomicU64::new(0),
            scheduled: AtomicU64::new(0),
        }
    }

    /// Schedule `refresh` after the window unless a timer is already pending.
    /// Returns whether a new timer was scheduled.
    pub fn request<F, Fut>(&self, refresh: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.requested.fetch_add(1, Ordering::Relaxed);
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("Refresh already pending, coalesced");
            return false;
        }

        let pending = Arc::clone(&self.pending);
        let window = self.window;
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            pending.store(false, Ordering::Release);
            refresh().await;
        });

        self.scheduled.fetch_add(1, Ordering::Relaxed);
        *self.timer_slot() = Some(task.abort_handle());
        tracing::debug!(window_ms = window.as_millis() as u64, "Refresh scheduled");
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Drop any pending timer.
    pub fn cancel(&self) {
        if let Some(timer) = self.timer_slot().take() {
            timer.abort();
        }
        self.pending.store(false, Ordering::Release);
    }

    /// Triggers received and timers actually scheduled.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.requested.load(Ordering::Relaxed),
            self.scheduled.load(Ordering::Relaxed),
        )
    }

    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WINDOW: Duration = Duration::from_millis(500);

    fn counter_refresh(count: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesced_into_one_refresh() {
        let throttler = RefreshThrottler::new(WINDOW);
        let refreshes = Arc::new(AtomicUsize::new(0));

        assert!(throttler.request(counter_refresh(&refreshes)));
        for _ in 0..49 {
            assert!(!throttler.request(counter_refresh(&refreshes)));
            tokio::time::advance(Duration::from_millis(5)).await;
        }

        settle(WINDOW).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert!(!throttler.is_pending());
        assert_eq!(throttler.counts(), (50, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_not_extended() {
        let throttler = RefreshThrottler::new(WINDOW);
        let refreshes = Arc::new(AtomicUsize::new(0));

        throttler.request(counter_refresh(&refreshes));
        settle(Duration::from_millis(400)).await;
        throttler.request(counter_refresh(&refreshes));
        settle(Duration::from_millis(150)).await;

        // Fired at 500 ms despite the trigger at 400 ms.
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_refresh_opens_new_window() {
        let throttler = Arc::new(RefreshThrottler::new(WINDOW));
        let refreshes = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&throttler);
        let count = Arc::clone(&refreshes);
        throttler.request(move || async move {
            count.fetch_add(1, Ordering::SeqCst);
            // Pending was cleared before this ran.
            assert!(inner.request(counter_refresh(&count)));
        });

        settle(WINDOW).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        settle(WINDOW).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_timer() {
        let throttler = RefreshThrottler::new(WINDOW);
        let refreshes = Arc::new(AtomicUsize::new(0));

        throttler.request(counter_refresh(&refreshes));
        throttler.cancel();
        settle(WINDOW * 2).await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
        assert!(!throttler.is_pending());
    }
}
