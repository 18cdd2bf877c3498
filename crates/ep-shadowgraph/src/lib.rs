//! # Shadowgraph
//!
//! Mirrors the linker's accepted events into a queryable store for
//! gossip sync: every linked event is inserted here the
//! moment it is accepted, independent of and concurrent with consensus.
//! Gossip uses [`ShadowgraphHandle::ancestor_generations`] to compute
//! the highest generation it has seen from each creator reachable from
//! a given event, the basis for "what does this peer still need"
//! exchanges. It also indexes each creator's latest mirrored event,
//! which the event creation manager queries through
//! [`ShadowgraphHandle::latest_event_of`] when picking an other-parent.
//! Entries are dropped once the non-ancient window leaves them behind,
//! same as the linker's own bookkeeping. Not consensus-critical: a
//! stalled or lagging shadowgraph only degrades gossip efficiency and
//! other-parent choice, never correctness.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ep_bus::{StageHandle, Wire, WindowReader};
use ep_types::{Hash, LinkedEvent, NodeId};
use tokio::sync::Mutex;

/// Tuning knobs for the shadowgraph stage.
#[derive(Debug, Clone, Copy)]
pub struct ShadowgraphConfig {
    pub input_queue_capacity: usize,
}

impl Default for ShadowgraphConfig {
    fn default() -> Self {
        Self { input_queue_capacity: 1024 }
    }
}

struct ShadowState {
    events: HashMap<Hash, Arc<LinkedEvent>>,
    /// The highest-generation event mirrored so far per creator, the
    /// index the event-creation manager uses to pick an other-parent.
    latest_by_creator: HashMap<NodeId, Arc<LinkedEvent>>,
    last_swept_round: u64,
}

impl ShadowState {
    fn new() -> Self {
        Self { events: HashMap::new(), latest_by_creator: HashMap::new(), last_swept_round: 0 }
    }

    fn insert(&mut self, linked: Arc<LinkedEvent>) {
        let creator = linked.creator_id();
        let is_latest = self.latest_by_creator.get(&creator).map_or(true, |prev| linked.generation() > prev.generation());
        if is_latest {
            self.latest_by_creator.insert(creator, linked.clone());
        }
        self.events.insert(linked.hash(), linked);
    }

    fn evict_ancient(&mut self, window: &ep_types::NonAncientWindow) {
        self.events.retain(|_, e| !window.is_ancient(e.generation(), e.birth_round()));
        self.latest_by_creator.retain(|_, e| !window.is_ancient(e.generation(), e.birth_round()));
    }
}

/// Highest generation seen per creator, walking the event's own
/// self/other-parent pointers rather than the shadowgraph's store —
/// `LinkedEvent` already carries its full ancestry, so a lookup isn't
/// needed to answer this query.
fn ancestor_generations(root: &Arc<LinkedEvent>) -> HashMap<NodeId, u64> {
    let mut generations: HashMap<NodeId, u64> = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root.clone()];

    while let Some(event) = stack.pop() {
        if !visited.insert(event.hash()) {
            continue;
        }
        let slot = generations.entry(event.creator_id()).or_insert(0);
        if event.generation() > *slot {
            *slot = event.generation();
        }
        if let Some(sp) = &event.self_parent {
            stack.push(sp.clone());
        }
        if let Some(op) = &event.other_parent {
            stack.push(op.clone());
        }
    }

    generations
}

/// Cloneable handle for querying the mirrored event store from outside
/// the pipeline (the gossip layer).
#[derive(Clone)]
pub struct ShadowgraphHandle {
    state: Arc<Mutex<ShadowState>>,
}

impl ShadowgraphHandle {
    /// `true` if this event has been mirrored and not yet evicted.
    pub async fn contains(&self, hash: Hash) -> bool {
        self.state.lock().await.events.contains_key(&hash)
    }

    /// Looks up a mirrored event by hash.
    pub async fn get(&self, hash: Hash) -> Option<Arc<LinkedEvent>> {
        self.state.lock().await.events.get(&hash).cloned()
    }

    /// Highest generation observed per creator among `hash`'s ancestors
    /// (inclusive). `None` if `hash` isn't mirrored.
    pub async fn ancestor_generations(&self, hash: Hash) -> Option<HashMap<NodeId, u64>> {
        let root = self.state.lock().await.events.get(&hash).cloned()?;
        Some(ancestor_generations(&root))
    }

    /// The highest-generation mirrored event by `creator`, if any.
    pub async fn latest_event_of(&self, creator: NodeId) -> Option<Arc<LinkedEvent>> {
        self.state.lock().await.latest_by_creator.get(&creator).cloned()
    }

    /// Every creator with at least one mirrored, non-ancient event.
    pub async fn known_creators(&self) -> Vec<NodeId> {
        self.state.lock().await.latest_by_creator.keys().copied().collect()
    }

    /// Number of events currently mirrored.
    pub async fn len(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// `true` if nothing is currently mirrored.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.events.is_empty()
    }
}

/// Spawns the shadowgraph stage. Returns the inlet every linked event
/// is soldered onto, the stage handle, and a cloneable query handle for
/// the gossip layer.
pub fn spawn(window: WindowReader, config: ShadowgraphConfig) -> (Wire<Arc<LinkedEvent>>, StageHandle, ShadowgraphHandle) {
    let (inlet, rx, pending) = Wire::channel(config.input_queue_capacity);
    let state = Arc::new(Mutex::new(ShadowState::new()));
    let handle_state = state.clone();

    let stage_handle = ep_bus::spawn_sequential("shadowgraph", rx, pending, move |linked: Arc<LinkedEvent>| {
        let state = state.clone();
        let window = window.clone();
        async move {
            let mut guard = state.lock().await;
            guard.insert(linked);

            let current = window.current();
            if current.latest_consensus_round > guard.last_swept_round {
                guard.evict_ancient(&current);
                guard.last_swept_round = current.latest_consensus_round;
            }

            ep_telemetry::SHADOWGRAPH_EVENTS_STORED.set(guard.events.len() as f64);
        }
    });

    (inlet, stage_handle, ShadowgraphHandle { state: handle_state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_bus::WindowPublisher;
    use ep_types::{AncientMode, EventBuilder, NodeId, NonAncientWindow};

    fn root(creator: NodeId, hash_byte: u8) -> Arc<LinkedEvent> {
        let mut hash = [0u8; 32];
        hash[0] = hash_byte;
        let event = EventBuilder::new(creator).time_created(1).build().with_hash(hash);
        Arc::new(LinkedEvent { event: Arc::new(event), self_parent: None, other_parent: None, round_created: 0, is_witness: false })
    }

    fn child(creator: NodeId, parent: Arc<LinkedEvent>, hash_byte: u8) -> Arc<LinkedEvent> {
        let mut hash = [0u8; 32];
        hash[0] = hash_byte;
        let event = EventBuilder::new(creator).self_parent(Some(parent.event.descriptor())).time_created(2).build().with_hash(hash);
        Arc::new(LinkedEvent { event: Arc::new(event), self_parent: Some(parent), other_parent: None, round_created: 0, is_witness: false })
    }

    #[tokio::test]
    async fn test_inserted_event_is_queryable_by_hash() {
        let (_publisher, reader) = WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (inlet, handle, sg) = spawn(reader, ShadowgraphConfig::default());

        let e = root(NodeId(1), 1);
        inlet.solder_to(e.clone()).await.unwrap();
        handle.flush().await;

        assert!(sg.contains(e.hash()).await);
        assert_eq!(sg.len().await, 1);
    }

    #[tokio::test]
    async fn test_ancestor_generations_tracks_highest_generation_per_creator() {
        let (_publisher, reader) = WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (inlet, handle, sg) = spawn(reader, ShadowgraphConfig::default());

        let r = root(NodeId(1), 1);
        let c = child(NodeId(1), r.clone(), 2);
        inlet.solder_to(r).await.unwrap();
        inlet.solder_to(c.clone()).await.unwrap();
        handle.flush().await;

        let generations = sg.ancestor_generations(c.hash()).await.expect("event was mirrored");
        assert_eq!(generations.get(&NodeId(1)), Some(&c.generation()));
    }

    #[tokio::test]
    async fn test_latest_event_of_tracks_highest_generation_per_creator() {
        let (_publisher, reader) = WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (inlet, handle, sg) = spawn(reader, ShadowgraphConfig::default());

        let r = root(NodeId(1), 1);
        let c = child(NodeId(1), r.clone(), 2);
        inlet.solder_to(r.clone()).await.unwrap();
        handle.flush().await;
        assert_eq!(sg.latest_event_of(NodeId(1)).await.map(|e| e.hash()), Some(r.hash()));

        inlet.solder_to(c.clone()).await.unwrap();
        handle.flush().await;
        assert_eq!(sg.latest_event_of(NodeId(1)).await.map(|e| e.hash()), Some(c.hash()));
        assert_eq!(sg.known_creators().await, vec![NodeId(1)]);
    }

    #[tokio::test]
    async fn test_unknown_hash_returns_none() {
        let (_publisher, reader) = WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (_inlet, _handle, sg) = spawn(reader, ShadowgraphConfig::default());

        assert_eq!(sg.ancestor_generations([9u8; 32]).await, None);
    }

    #[tokio::test]
    async fn test_window_advance_evicts_ancient_events() {
        let (publisher, reader) = WindowPublisher::new(NonAncientWindow::genesis(AncientMode::BirthRound));
        let (inlet, handle, sg) = spawn(reader, ShadowgraphConfig::default());

        let e = root(NodeId(1), 1);
        inlet.solder_to(e.clone()).await.unwrap();
        handle.flush().await;
        assert!(sg.contains(e.hash()).await);

        publisher.publish(NonAncientWindow::genesis(AncientMode::BirthRound).advance(50, 100, 100));
        let later = child(NodeId(1), e.clone(), 2);
        inlet.solder_to(later).await.unwrap();
        handle.flush().await;

        assert!(!sg.contains(e.hash()).await, "event below the new ancient threshold should have been evicted");
    }
}
