//! # In-Order Linker
//!
//! Sequential stage turning each arriving [`Event`] into a
//! [`LinkedEvent`] by resolving its declared parent hashes against
//! every `LinkedEvent` linked so far. By the time an event reaches
//! here the orphan buffer has already guaranteed both parents are
//! either present or ancient, so a lookup miss on a non-ancient parent
//! is a bug elsewhere in the pipeline, not a malformed or malicious
//! input: it is logged as a fatal invariant violation and the event is
//! dropped rather than the stage crashing.
//!
//! State is a flat `hash -> Arc<LinkedEvent>` map, evicted as the
//! non-ancient window advances — the same shape as the dependency
//! resolution a Kahn's-algorithm in-degree map performs, just keyed by
//! content hash instead of transaction hash.

use std::collections::HashMap;
use std::sync::Arc;

use ep_bus::{StageHandle, Wire, WindowReader};
use ep_pces::SequencedEvent;
use ep_types::{Event, EventDescriptor, Hash, LinkedEvent, NonAncientWindow};
use tracing::error;

/// A linked event paired with its position in the pre-consensus event
/// stream, the shape the consensus engine needs to know which PCES
/// sequence number gates a round's release once it picks a keystone.
#[derive(Debug, Clone)]
pub struct LinkerOutput {
    pub linked: Arc<LinkedEvent>,
    pub stream_sequence_number: u64,
}

struct LinkerState {
    linked: HashMap<Hash, Arc<LinkedEvent>>,
    last_window_round: u64,
}

impl LinkerState {
    fn new() -> Self {
        Self { linked: HashMap::new(), last_window_round: 0 }
    }

    fn resolve(&self, descriptor: Option<EventDescriptor>, window: &NonAncientWindow) -> Result<Option<Arc<LinkedEvent>>, EventDescriptor> {
        let Some(descriptor) = descriptor else {
            return Ok(None);
        };
        if let Some(linked) = self.linked.get(&descriptor.hash) {
            return Ok(Some(linked.clone()));
        }
        if window.is_ancient(descriptor.generation, descriptor.birth_round) {
            // Evicted (or never linked because it was already ancient
            // when its child arrived): the child simply has no
            // in-memory ancestor reference on that side.
            return Ok(None);
        }
        Err(descriptor)
    }

    fn evict_ancient(&mut self, window: &NonAncientWindow) {
        self.linked.retain(|_, linked| !window.is_ancient(linked.generation(), linked.birth_round()));
    }
}

/// Spawns the linker. `to_shadowgraph` receives every successfully
/// linked event for gossip-sync mirroring; `to_consensus` receives the
/// same events paired with their durable-stream sequence number, which
/// the consensus engine needs to gate a round's release on durability.
pub fn spawn(
    window: WindowReader,
    input_queue_capacity: usize,
    to_shadowgraph: Wire<Arc<LinkedEvent>>,
    to_consensus: Wire<LinkerOutput>,
) -> (Wire<SequencedEvent>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let state = std::sync::Arc::new(tokio::sync::Mutex::new(LinkerState::new()));

    let handle = ep_bus::spawn_sequential("in_order_linker", rx, pending, move |sequenced: SequencedEvent| {
        let to_shadowgraph = to_shadowgraph.clone();
        let to_consensus = to_consensus.clone();
        let window = window.clone();
        let state = state.clone();
        async move {
            let stream_sequence_number = sequenced.stream_sequence_number;
            let event: Event = sequenced.event;
            let current_window = window.current();
            let mut state = state.lock().await;

            if current_window.latest_consensus_round > state.last_window_round {
                state.last_window_round = current_window.latest_consensus_round;
                state.evict_ancient(&current_window);
            }

            let self_parent = match state.resolve(event.self_parent, &current_window) {
                Ok(resolved) => resolved,
                Err(missing) => {
                    error!(hash = ?missing.hash, "linker: self-parent missing and not ancient, invariant violation");
                    ep_telemetry::STAGE_ERRORS.with_label_values(&["linker", "unresolved_parent"]).inc();
                    return;
                }
            };
            let other_parent = match state.resolve(event.other_parent, &current_window) {
                Ok(resolved) => resolved,
                Err(missing) => {
                    error!(hash = ?missing.hash, "linker: other-parent missing and not ancient, invariant violation");
                    ep_telemetry::STAGE_ERRORS.with_label_values(&["linker", "unresolved_parent"]).inc();
                    return;
                }
            };

            let hash = event.hash.expect("linker runs downstream of the hasher");
            let linked = Arc::new(LinkedEvent {
                event: Arc::new(event),
                self_parent,
                other_parent,
                // The consensus engine is the sole owner of round-created
                // and witness classification; it tracks those in its own
                // per-hash bookkeeping rather than mutating a shared Arc.
                round_created: 0,
                is_witness: false,
            });
            state.linked.insert(hash, linked.clone());
            let _ = to_consensus.solder_to(LinkerOutput { linked: linked.clone(), stream_sequence_number }).await;
            let _ = to_shadowgraph.solder_to(linked).await;
        }
    });

    (inlet, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::{AncientMode, EventBuilder, NodeId};

    fn hashed(creator: NodeId, self_parent: Option<EventDescriptor>, time: u64) -> Event {
        let event = EventBuilder::new(creator).self_parent(self_parent).time_created(time).build();
        let mut hash = [0u8; 32];
        hash[0] = creator.0 as u8;
        hash[1..9].copy_from_slice(&time.to_be_bytes());
        event.with_hash(hash)
    }

    fn sequenced(event: Event, seq: u64) -> SequencedEvent {
        SequencedEvent { event, stream_sequence_number: seq }
    }

    #[tokio::test]
    async fn test_links_genesis_event_with_no_parents() {
        let (_publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (out, mut out_rx, _p) = Wire::channel(8);
        let (to_consensus, _consensus_rx, _p2) = Wire::channel(8);
        let (inlet, handle) = spawn(reader, 8, out, to_consensus);

        let event = hashed(NodeId(1), None, 1);
        inlet.solder_to(sequenced(event.clone(), 0)).await.unwrap();
        handle.flush().await;

        let linked = out_rx.try_recv().unwrap();
        assert_eq!(linked.hash(), event.hash.unwrap());
        assert!(linked.self_parent.is_none());
    }

    #[tokio::test]
    async fn test_resolves_self_parent_reference() {
        let (_publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (out, mut out_rx, _p) = Wire::channel(8);
        let (to_consensus, _consensus_rx, _p2) = Wire::channel(8);
        let (inlet, handle) = spawn(reader, 8, out, to_consensus);

        let parent = hashed(NodeId(1), None, 1);
        let child = hashed(NodeId(1), Some(parent.descriptor()), 2);

        inlet.solder_to(sequenced(parent.clone(), 0)).await.unwrap();
        inlet.solder_to(sequenced(child.clone(), 1)).await.unwrap();
        handle.flush().await;

        let linked_parent = out_rx.try_recv().unwrap();
        let linked_child = out_rx.try_recv().unwrap();
        assert_eq!(linked_parent.hash(), parent.hash.unwrap());
        let resolved = linked_child.self_parent.as_ref().unwrap();
        assert_eq!(resolved.hash(), parent.hash.unwrap());
    }

    #[tokio::test]
    async fn test_missing_nonancient_parent_is_dropped_not_crashed() {
        let (_publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (out, mut out_rx, _p) = Wire::channel(8);
        let (to_consensus, _consensus_rx, _p2) = Wire::channel(8);
        let (inlet, handle) = spawn(reader, 8, out, to_consensus);

        let missing_parent = EventDescriptor { hash: [9u8; 32], generation: 0, birth_round: 0, creator_id: NodeId(9) };
        let child = hashed(NodeId(1), Some(missing_parent), 1);
        inlet.solder_to(sequenced(child, 0)).await.unwrap();
        handle.flush().await;

        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ancient_parent_resolves_to_none_without_lookup() {
        let (publisher, reader) = ep_bus::WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        publisher.publish(reader.current().advance(10, 5, 5));
        let (out, mut out_rx, _p) = Wire::channel(8);
        let (to_consensus, _consensus_rx, _p2) = Wire::channel(8);
        let (inlet, handle) = spawn(reader, 8, out, to_consensus);

        let ancient_parent = EventDescriptor { hash: [9u8; 32], generation: 0, birth_round: 0, creator_id: NodeId(9) };
        let child = hashed(NodeId(1), Some(ancient_parent), 1);
        inlet.solder_to(sequenced(child.clone(), 0)).await.unwrap();
        handle.flush().await;

        let linked = out_rx.try_recv().unwrap();
        assert_eq!(linked.hash(), child.hash.unwrap());
        assert!(linked.self_parent.is_none());
    }
}
