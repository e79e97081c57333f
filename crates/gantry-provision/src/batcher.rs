//! The batching gate.
//!
//! A single-slot coalescing gate in front of the provisioning loop.
//! `trigger` is non-blocking and idempotent; `wait` blocks for the first
//! trigger, then keeps collecting further triggers until the stream goes
//! quiet for the idle window, capped by the max window. Bursts of pod
//! arrivals collapse into one pass of bounded latency; the single slot is
//! the loop's back-pressure mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::trace;

/// Coalesces triggers into scheduling windows.
#[derive(Debug)]
pub struct Batcher {
    pending: AtomicBool,
    immediate: AtomicBool,
    notify: Notify,
    idle_window: Duration,
    max_window: Duration,
}

impl Batcher {
    pub fn new(idle_window: Duration, max_window: Duration) -> Self {
        Self {
            pending: AtomicBool::new(false),
            immediate: AtomicBool::new(false),
            notify: Notify::new(),
            idle_window,
            max_window,
        }
    }

    /// Request a pass. Non-blocking; triggers while one is already
    /// pending collapse into it.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
        trace!("batcher triggered");
    }

    /// Request a pass that starts without waiting out the window. Test
    /// hook only.
    pub fn trigger_immediate(&self) {
        self.immediate.store(true, Ordering::Release);
        self.trigger();
    }

    /// Block until the next batch closes. Returns the window that
    /// elapsed between the first trigger and the close, or `None` once
    /// the shutdown channel fires.
    pub async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Duration> {
        if *shutdown.borrow() {
            return None;
        }
        // Arm: wait for the first trigger.
        loop {
            if self.pending.swap(false, Ordering::AcqRel) {
                break;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => return None,
            }
        }

        let start = Instant::now();
        let mut last_trigger = start;
        if self.immediate.swap(false, Ordering::AcqRel) {
            return Some(Duration::ZERO);
        }

        // Collect: every further trigger restarts the idle window, the
        // max window caps the whole batch.
        loop {
            let idle_deadline = last_trigger + self.idle_window;
            let max_deadline = start + self.max_window;
            let deadline = idle_deadline.min(max_deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = self.notify.notified() => {
                    if self.pending.swap(false, Ordering::AcqRel) {
                        last_trigger = Instant::now();
                        if self.immediate.swap(false, Ordering::AcqRel) {
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => return None,
            }
        }
        Some(start.elapsed())
    }
}
