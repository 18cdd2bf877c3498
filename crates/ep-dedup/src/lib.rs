//! # Event Deduplicator
//!
//! Sequential stage maintaining `eventHash -> seen` over the
//! non-ancient window. Duplicates are dropped; entries
//! whose ancient identifier falls below the window's minimum are
//! evicted on each window update rather than kept indefinitely, so the
//! map stays bounded by the size of the non-ancient window, not by
//! total events ever seen.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ep_bus::{StageHandle, Wire, WindowReader};
use ep_types::{Event, Hash};
use tokio::sync::Mutex;
use tracing::debug;

struct DedupState {
    seen: HashSet<Hash>,
    by_ancient_id: BTreeMap<u64, Vec<Hash>>,
    last_min_seen: u64,
}

impl DedupState {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            by_ancient_id: BTreeMap::new(),
            last_min_seen: 0,
        }
    }

    fn evict_below(&mut self, min_non_ancient_identifier: u64) {
        if min_non_ancient_identifier <= self.last_min_seen {
            return;
        }
        let still_live = self.by_ancient_id.split_off(&min_non_ancient_identifier);
        let evicted = std::mem::replace(&mut self.by_ancient_id, still_live);
        for hashes in evicted.values() {
            for hash in hashes {
                self.seen.remove(hash);
            }
        }
        self.last_min_seen = min_non_ancient_identifier;
    }

    /// Returns `true` if `event` had already been seen (i.e. should be
    /// dropped as a duplicate).
    fn check_and_record(&mut self, event: &Event, ancient_id: u64) -> bool {
        let hash = event.hash.expect("dedup runs downstream of the hasher");
        if !self.seen.insert(hash) {
            return true;
        }
        self.by_ancient_id.entry(ancient_id).or_default().push(hash);
        false
    }
}

/// Spawns the deduplicator as a sequential stage.
pub fn spawn(window: WindowReader, input_queue_capacity: usize, out: Wire<Event>) -> (Wire<Event>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let state = Arc::new(Mutex::new(DedupState::new()));

    let handle = ep_bus::spawn_sequential("deduplicator", rx, pending, move |event: Event| {
        let out = out.clone();
        let window = window.clone();
        let state = state.clone();
        async move {
            let current_window = window.current();
            let mut state = state.lock().await;
            state.evict_below(current_window.min_non_ancient_identifier);
            let ancient_id = current_window.ancient_identifier(event.generation, event.birth_round);
            if state.check_and_record(&event, ancient_id) {
                debug!(hash = ?event.hash, "deduplicator dropped duplicate event");
                ep_telemetry::EVENTS_DEDUPLICATED.inc();
                return;
            }
            let _ = out.solder_to(event).await;
        }
    });

    (inlet, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::{AncientMode, EventBuilder, NodeId, NonAncientWindow};

    fn window_reader(initial: NonAncientWindow) -> (ep_bus::WindowPublisher, WindowReader) {
        ep_bus::WindowPublisher::new(initial)
    }

    fn hashed_event(n: u8) -> Event {
        EventBuilder::new(NodeId(1)).time_created(n as u64).build().with_hash([n; 32])
    }

    #[tokio::test]
    async fn test_duplicate_dropped() {
        let (publisher, reader) = window_reader(NonAncientWindow::genesis(AncientMode::Generation));
        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlet, handle) = spawn(reader, 4, out);

        let event = hashed_event(1);
        inlet.solder_to(event.clone()).await.unwrap();
        inlet.solder_to(event).await.unwrap();
        handle.flush().await;

        assert!(out_rx.try_recv().is_ok());
        assert!(out_rx.try_recv().is_err());
        drop(publisher);
    }

    #[tokio::test]
    async fn test_distinct_hashes_both_pass() {
        let (_publisher, reader) = window_reader(NonAncientWindow::genesis(AncientMode::Generation));
        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlet, handle) = spawn(reader, 4, out);

        inlet.solder_to(hashed_event(1)).await.unwrap();
        inlet.solder_to(hashed_event(2)).await.unwrap();
        handle.flush().await;

        assert!(out_rx.try_recv().is_ok());
        assert!(out_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_window_advance_evicts_ancient_hash() {
        let (publisher, reader) = window_reader(NonAncientWindow::genesis(AncientMode::Generation));
        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlet, handle) = spawn(reader, 4, out);

        let mut event = hashed_event(1);
        event.generation = 0;
        inlet.solder_to(event.clone()).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_ok());

        // Advance the window so generation 0 is now ancient, then resend
        // the same hash: it should be treated as new again.
        publisher.publish(reader.current().advance(5, 1, 1));
        inlet.solder_to(event).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_ok());
    }
}
