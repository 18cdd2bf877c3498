//! # Backpressure Object Counter
//!
//! The hasher and the post-hash collector cannot back-pressure each
//! other through a bounded queue alone, because the hasher fans out to
//! concurrent workers whose completion order does not match submission
//! order. A `BackpressureObjectCounter` spans the two:
//! on-ramped when an event enters the hasher, off-ramped when the
//! collector emits it downstream.

use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

/// A capacity gate shared by two non-adjacent-queue stages.
#[derive(Clone)]
pub struct BackpressureObjectCounter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl BackpressureObjectCounter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// On-ramps one object, blocking until capacity is available. The
    /// returned `CapacityPermit` must travel with the object through
    /// the hasher and be dropped only once the collector has emitted
    /// it (spec: "off-ramped at the post-hash collector's output").
    pub async fn on_ramp(&self) -> CapacityPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("BackpressureObjectCounter semaphore is never closed");
        CapacityPermit { _permit: permit }
    }

    /// Non-blocking on-ramp, for callers (e.g. the PCES replayer feeding
    /// the hasher directly) that must not await capacity mid-batch.
    pub fn try_on_ramp(&self) -> Result<CapacityPermit, TryAcquireError> {
        let permit = self.semaphore.clone().try_acquire_owned()?;
        Ok(CapacityPermit { _permit: permit })
    }
}

/// Held by an object while it occupies hasher/collector capacity;
/// off-ramps automatically on drop.
pub struct CapacityPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
