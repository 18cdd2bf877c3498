//! # Wire
//!
//! A wire solders one stage's output to another stage's input: `A.out
//! .solder_to(B.in)` enqueues into `B`'s bounded queue, honoring its
//! backpressure. Cycles are forbidden on this path; the
//! only cyclic edges in the pipeline (event-creation feedback, window
//! broadcast) go through `inject` instead.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::pending::PendingTracker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolderError {
    #[error("target stage is no longer accepting input")]
    Closed,
}

/// The enqueue side of a soldered connection. Cloneable so multiple
/// upstream stages (or fan-out points within one stage) can share an
/// output wire.
#[derive(Clone)]
pub struct Wire<T> {
    sender: mpsc::Sender<T>,
    pending: Arc<PendingTracker>,
}

impl<T: Send + 'static> Wire<T> {
    /// Creates a soldered connection with the given backpressure
    /// capacity, returning the sender half and the receiver half that
    /// feeds the target stage's worker loop.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<T>, Arc<PendingTracker>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let pending = PendingTracker::new();
        (
            Self {
                sender,
                pending: pending.clone(),
            },
            receiver,
            pending,
        )
    }

    /// Enqueues `item`, awaiting capacity if the target's queue is
    /// full. This is the normal solder: it respects backpressure.
    ///
    /// # Errors
    ///
    /// Returns `SolderError::Closed` if the target stage has shut down.
    pub async fn solder_to(&self, item: T) -> Result<(), SolderError> {
        self.pending.increment();
        match self.sender.send(item).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.pending.decrement();
                Err(SolderError::Closed)
            }
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_solder_to_delivers_item() {
        let (wire, mut rx, _pending) = Wire::channel(4);
        wire.solder_to(42u32).await.unwrap();
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn test_solder_to_closed_target() {
        let (wire, rx, _pending) = Wire::channel(1);
        drop(rx);
        assert_eq!(wire.solder_to(1u32).await, Err(SolderError::Closed));
    }
}
