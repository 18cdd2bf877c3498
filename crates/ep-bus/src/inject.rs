//! # Inject Edges
//!
//! `solderTo(..., INJECT)` bypasses backpressure entirely; it is the
//! only mechanism allowed to close a cycle in the pipeline graph (spec
//! §4.1, §5): the event-creation feedback loop back into the internal
//! validator, and the non-ancient window broadcast out of the
//! event-window-manager. Both are implemented here because an unbounded
//! queue and a blocking send can never deadlock each other.

use tokio::sync::mpsc;
use tracing::warn;

/// A point-to-point inject edge backed by an unbounded queue. Used for
/// the single cyclic edge in the pipeline: event-creation's self-created
/// events re-entering the internal validator.
#[derive(Clone)]
pub struct InjectWire<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> InjectWire<T> {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueues `item` without blocking or respecting any capacity.
    /// Only fails if the receiving stage has already shut down, in
    /// which case the item is dropped and a warning logged rather than
    /// propagated as an error: an INJECT caller must never block or
    /// fail on a closed downstream during shutdown.
    pub fn solder_inject(&self, item: T) {
        if self.sender.send(item).is_err() {
            warn!("INJECT edge target has shut down, dropping item");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inject_delivers_item() {
        let (wire, mut rx) = InjectWire::channel();
        wire.solder_inject(7u32);
        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_inject_into_closed_receiver_does_not_panic() {
        let (wire, rx) = InjectWire::channel();
        drop(rx);
        wire.solder_inject(1u32);
    }
}
