// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Heartbeat Loop: periodic host-stat refresh while anyone is watching.
//!
//! stopped -> running on `start`; running -> stopped after a tick that finds
//! no viewer. Starting while running is a no-op.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    task: Mutex<Option<AbortHandle>>,
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Start the loop unless it is already running.
    ///
    /// Each iteration awaits `tick`, then keeps going only while `active`
    /// reports at least one viewer.
    pub fn start<T, Fut, A>(&self, tick: T, active: A) -> bool
    where
        T: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        A: Fn() -> bool + Send + Sync + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let running = Arc::clone(&self.running);
        let ticks = Arc::clone(&self.ticks);
        let period = self.period;
        tracing::debug!(period_ms = period.as_millis() as u64, "Heartbeat started");

        let task = tokio::spawn(async move {
            loop {
                tick().await;
                ticks.fetch_add(1, Ordering::Relaxed);

                if !active() {
                    running.store(false, Ordering::Release);
                    // A viewer may have arrived between the check and the store
                    // and seen the loop as running.
                    let revived = active()
                        && running
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok();
                    if !revived {
                        tracing::debug!("Heartbeat stopped, no viewer connected");
                        return;
                    }
                }

                tokio::time::sleep(period).await;
            }
        });

        *self.task_slot() = Some(task.abort_handle());
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        if let Some(task) = self.task_slot().take() {
            task.abort();
        }
        self.running.store(false, Ordering::Release);
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(5);

    fn start(heartbeat: &Heartbeat, viewers: &Arc<AtomicBool>) -> bool {
        let viewers = Arc::clone(viewers);
        heartbeat.start(
            || std::future::ready(()),
            move || viewers.load(Ordering::SeqCst),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_while_viewers_connected() {
        let heartbeat = Heartbeat::new(PERIOD);
        let viewers = Arc::new(AtomicBool::new(true));

        assert!(start(&heartbeat, &viewers));
        assert!(!start(&heartbeat, &viewers));

        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(10)).await;
        assert_eq!(heartbeat.ticks(), 4);
        assert!(heartbeat.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_without_viewers_and_restarts() {
        let heartbeat = Heartbeat::new(PERIOD);
        let viewers = Arc::new(AtomicBool::new(true));

        start(&heartbeat, &viewers);
        tokio::time::sleep(Duration::from_millis(10)).await;
        viewers.store(false, Ordering::SeqCst);

        tokio::time::sleep(PERIOD * 2).await;
        assert!(!heartbeat.is_running());
        let ticks = heartbeat.ticks();
        assert_eq!(ticks, 2);

        tokio::time::sleep(PERIOD * 2).await;
        assert_eq!(heartbeat.ticks(), ticks);

        viewers.store(true, Ordering::SeqCst);
        assert!(start(&heartbeat, &viewers));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(heartbeat.ticks(), ticks + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_loop() {
        let heartbeat = Heartbeat::new(PERIOD);
        let viewers = Arc::new(AtomicBool::new(true));

        start(&heartbeat, &viewers);
        tokio::time::sleep(Duration::from_millis(10)).await;
        heartbeat.stop();
        tokio::time::sleep(PERIOD * 3).await;

        assert_eq!(heartbeat.ticks(), 1);
        assert!(!heartbeat.is_running());
    }
}
