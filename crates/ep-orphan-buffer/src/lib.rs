//! # Orphan Buffer
//!
//! An event is an orphan if either declared parent is not yet present
//! in the buffer's recent-events set and is not ancient.
//! Orphans are indexed by their missing parent's hash; when that parent
//! arrives (or falls ancient, so it can never arrive), every event
//! waiting on it is re-checked and released recursively if now fully
//! resolved.

use std::collections::{HashMap, HashSet, VecDeque};

use ep_bus::{StageHandle, Wire, WindowReader};
use ep_types::{Event, EventDescriptor, Hash, NonAncientWindow};
use tokio::sync::Mutex;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy)]
pub struct OrphanBufferConfig {
    /// Bounds `knownRecent`; oldest entries are evicted first.
    pub known_recent_capacity: usize,
}

impl Default for OrphanBufferConfig {
    fn default() -> Self {
        Self { known_recent_capacity: 10_000 }
    }
}

struct MissingParentEntry {
    waiting_children: HashSet<Hash>,
}

struct OrphanState {
    pending_by_missing_parent: HashMap<Hash, MissingParentEntry>,
    all_pending: HashMap<Hash, Event>,
    known_recent: HashSet<Hash>,
    known_recent_order: VecDeque<Hash>,
    capacity: usize,
    last_window_round: u64,
}

impl OrphanState {
    fn new(capacity: usize) -> Self {
        Self {
            pending_by_missing_parent: HashMap::new(),
            all_pending: HashMap::new(),
            known_recent: HashSet::new(),
            known_recent_order: VecDeque::new(),
            capacity,
            last_window_round: 0,
        }
    }

    fn remember(&mut self, hash: Hash) {
        if self.known_recent.insert(hash) {
            self.known_recent_order.push_back(hash);
            while self.known_recent_order.len() > self.capacity {
                if let Some(oldest) = self.known_recent_order.pop_front() {
                    self.known_recent.remove(&oldest);
                }
            }
        }
    }

    /// Parents still missing for `event` under the current window and
    /// `known_recent` set: declared, non-ancient, and unseen.
    fn missing_parents(&self, event: &Event, window: &NonAncientWindow) -> Vec<EventDescriptor> {
        [event.self_parent, event.other_parent]
            .into_iter()
            .flatten()
            .filter(|d| !window.is_ancient(d.generation, d.birth_round) && !self.known_recent.contains(&d.hash))
            .collect()
    }

    fn register_pending(&mut self, event: Event, missing: &[EventDescriptor]) {
        let hash = event.hash.expect("orphan buffer runs downstream of the hasher");
        for parent in missing {
            self.pending_by_missing_parent
                .entry(parent.hash)
                .or_insert_with(|| MissingParentEntry { waiting_children: HashSet::new() })
                .waiting_children
                .insert(hash);
        }
        self.all_pending.insert(hash, event);
        ep_telemetry::ORPHANS_BUFFERED.set(self.all_pending.len() as f64);
    }
}

/// Spawns the orphan buffer as a sequential stage.
pub fn spawn(window: WindowReader, config: OrphanBufferConfig, input_queue_capacity: usize, out: Wire<Event>) -> (Wire<Event>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let state = std::sync::Arc::new(Mutex::new(OrphanState::new(config.known_recent_capacity)));

    let handle = ep_bus::spawn_sequential("orphan_buffer", rx, pending, move |event: Event| {
        let out = out.clone();
        let window = window.clone();
        let state = state.clone();
        async move {
            let current_window = window.current();
            let mut state = state.lock().await;

            // Sweep ancient orphans whenever the window has advanced:
            // a missing parent that has fallen ancient can never arrive,
            // so every event waiting only on ancient parents is released.
            if current_window.latest_consensus_round > state.last_window_round {
                state.last_window_round = current_window.latest_consensus_round;
                let stale: Vec<Hash> = state
                    .all_pending
                    .iter()
                    .filter(|(_, ev)| state_fully_resolved(ev, &current_window, &state.known_recent))
                    .map(|(h, _)| *h)
                    .collect();
                for hash in stale {
                    release_chain(&mut state, &out, hash, &current_window).await;
                }
            }

            let hash = event.hash.expect("orphan buffer runs downstream of the hasher");
            let missing = state.missing_parents(&event, &current_window);
            if missing.is_empty() {
                state.remember(hash);
                let _ = out.solder_to(event).await;
                release_waiters_of(&mut state, &out, hash, &current_window).await;
            } else {
                debug!(hash = ?hash, missing = missing.len(), "orphan buffer: event missing parent(s)");
                state.register_pending(event, &missing);
            }
        }
    });

    (inlet, handle)
}

fn state_fully_resolved(event: &Event, window: &NonAncientWindow, known_recent: &HashSet<Hash>) -> bool {
    [event.self_parent, event.other_parent]
        .into_iter()
        .flatten()
        .all(|d| window.is_ancient(d.generation, d.birth_round) || known_recent.contains(&d.hash))
}

/// Releases `hash` (an event already known to be resolvable) and
/// recursively releases any children that were only waiting on it.
async fn release_chain(state: &mut OrphanState, out: &Wire<Event>, hash: Hash, window: &NonAncientWindow) {
    let Some(event) = state.all_pending.remove(&hash) else {
        return;
    };
    state.remember(hash);
    ep_telemetry::ORPHANS_RELEASED.inc();
    ep_telemetry::ORPHANS_BUFFERED.set(state.all_pending.len() as f64);
    if out.solder_to(event).await.is_err() {
        error!(hash = ?hash, "orphan buffer: downstream closed while releasing");
        return;
    }
    release_waiters_of(state, out, hash, window).await;
}

/// After `hash` becomes known, re-checks every event that was waiting
/// on it and releases whichever are now fully resolved.
async fn release_waiters_of(state: &mut OrphanState, out: &Wire<Event>, hash: Hash, window: &NonAncientWindow) {
    let Some(entry) = state.pending_by_missing_parent.remove(&hash) else {
        return;
    };
    for child_hash in entry.waiting_children {
        let Some(event) = state.all_pending.get(&child_hash) else {
            continue;
        };
        let still_missing = state.missing_parents(event, window);
        if still_missing.is_empty() {
            let event = state.all_pending.remove(&child_hash).unwrap();
            let child_hash = event.hash.unwrap();
            state.remember(child_hash);
            ep_telemetry::ORPHANS_RELEASED.inc();
            ep_telemetry::ORPHANS_BUFFERED.set(state.all_pending.len() as f64);
            if out.solder_to(event).await.is_err() {
                error!("orphan buffer: downstream closed while releasing descendant");
                continue;
            }
            Box::pin(release_waiters_of(&mut *state, out, child_hash, window)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::{AncientMode, EventBuilder, NodeId};

    fn hashed(creator: NodeId, self_parent: Option<EventDescriptor>, gen_override: Option<u64>) -> Event {
        let mut event = EventBuilder::new(creator).self_parent(self_parent).time_created(1).build();
        if let Some(g) = gen_override {
            event.generation = g;
        }
        let mut hash = [0u8; 32];
        hash[0] = creator.0 as u8;
        hash[1..9].copy_from_slice(&event.time_created.to_be_bytes());
        event.with_hash(hash)
    }

    fn descriptor_of(event: &Event) -> EventDescriptor {
        event.descriptor()
    }

    #[tokio::test]
    async fn test_orphan_then_parent_emits_in_order() {
        let (_publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (out, mut out_rx, _p) = Wire::channel(8);
        let (inlet, handle) = spawn(reader, OrphanBufferConfig::default(), 8, out);

        let parent = hashed(NodeId(1), None, Some(0));
        let mut child = hashed(NodeId(1), Some(descriptor_of(&parent)), None);
        child.time_created = 2;
        let child_hash = {
            let mut h = [0u8; 32];
            h[0] = 1;
            h[1..9].copy_from_slice(&2u64.to_be_bytes());
            h
        };
        let child = child.with_hash(child_hash);

        inlet.solder_to(child.clone()).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_err(), "child should be buffered as orphan");

        inlet.solder_to(parent.clone()).await.unwrap();
        handle.flush().await;

        let first = out_rx.try_recv().unwrap();
        assert_eq!(first.hash, parent.hash);
        let second = out_rx.try_recv().unwrap();
        assert_eq!(second.hash, child.hash);
    }

    #[tokio::test]
    async fn test_non_orphan_emits_immediately() {
        let (_publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlet, handle) = spawn(reader, OrphanBufferConfig::default(), 4, out);

        let event = hashed(NodeId(1), None, Some(0));
        inlet.solder_to(event).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_ancient_missing_parent_released_on_window_advance() {
        let (publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlet, handle) = spawn(reader, OrphanBufferConfig::default(), 4, out);

        let missing_parent_descriptor = EventDescriptor { hash: [42u8; 32], generation: 0, birth_round: 0, creator_id: NodeId(9) };
        let orphan = hashed(NodeId(1), Some(missing_parent_descriptor), None);
        inlet.solder_to(orphan.clone()).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_err());

        // Advance the window so birth_round 0 is ancient, then push any
        // new event through to trigger the sweep.
        publisher.publish(reader.current().advance(5, 1, 1));
        let trigger = hashed(NodeId(2), None, Some(0));
        inlet.solder_to(trigger.clone()).await.unwrap();
        handle.flush().await;

        let mut seen = vec![];
        while let Ok(e) = out_rx.try_recv() {
            seen.push(e.hash);
        }
        assert!(seen.contains(&orphan.hash));
        assert!(seen.contains(&trigger.hash));
    }
}
