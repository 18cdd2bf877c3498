//! # Non-Ancient Window Broadcast
//!
//! The event-window-manager is the single writer of the non-ancient
//! window; eight downstream stages read it. This is an
//! INJECT edge by construction: `tokio::sync::watch` always holds the
//! latest value and never blocks the writer on a slow or absent reader,
//! and a reader naturally applies "the latest window as of now" rather
//! than replaying every intermediate update — exactly the "apply
//! between events, never mid-event" rule 

use ep_types::NonAncientWindow;
use tokio::sync::watch;

/// Held by the event-window-manager; the sole writer of the window.
pub struct WindowPublisher {
    sender: watch::Sender<NonAncientWindow>,
}

impl WindowPublisher {
    #[must_use]
    pub fn new(initial: NonAncientWindow) -> (Self, WindowReader) {
        let (sender, receiver) = watch::channel(initial);
        (Self { sender }, WindowReader { receiver })
    }

    /// Publishes a new window. INJECTed to every subscribed reader;
    /// never blocks regardless of whether readers are keeping up.
    pub fn publish(&self, window: NonAncientWindow) {
        // `send` only fails if every receiver has been dropped, which
        // is not an error for a broadcast with no listeners left.
        let _ = self.sender.send(window);
    }
}

/// Held by each of the eight downstream stages that consult the window.
#[derive(Clone)]
pub struct WindowReader {
    receiver: watch::Receiver<NonAncientWindow>,
}

impl WindowReader {
    /// The most recently published window. Call this between events,
    /// never mid-event
    #[must_use]
    pub fn current(&self) -> NonAncientWindow {
        *self.receiver.borrow()
    }
}
