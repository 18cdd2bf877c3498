//! # Pending Tracker
//!
//! Backing primitive for `flush()`: a shared counter incremented when an
//! item is soldered into a stage and decremented once that stage's
//! handler has returned for it. A stage is idle, and therefore flushed,
//! exactly when its pending count reaches zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct PendingTracker {
    count: AtomicUsize,
    notify: Notify,
}

impl PendingTracker {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pending count underflow");
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Blocks until the tracked count reaches zero., a
    /// flush requires no *new* items be injected into this stage until
    /// downstream stages are flushed too; enforcing that is the wiring
    /// layer's responsibility, not this tracker's.
    pub async fn wait_until_zero(&self) {
        loop {
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_zero() {
        let tracker = PendingTracker::new();
        tracker.wait_until_zero().await;
    }

    #[tokio::test]
    async fn test_wait_unblocks_after_decrement() {
        let tracker = PendingTracker::new();
        tracker.increment();
        assert_eq!(tracker.get(), 1);

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_until_zero().await;
        });

        tokio::task::yield_now().await;
        tracker.decrement();
        handle.await.unwrap();
        assert_eq!(tracker.get(), 0);
    }
}
