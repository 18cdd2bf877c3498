//! # Consensus Engine
//!
//! Hashgraph virtual-voting consensus: witness detection
//! and round-created (`state`), fame election with coin rounds
//! (`fame`), and round-received/consensus-timestamp computation
//! (`round_received`), all riding on plain ancestor-pointer walks
//! (`ancestry`). A single sequential stage, since every step depends on
//! the previous event's classification.
//!
//! The engine also owns the event-window-manager: the sole writer of
//! the non-ancient window every other stage reads via
//! [`ep_bus::WindowReader`]. A round's ancient threshold
//! lags its emission by [`ROUNDS_NON_ANCIENT`] rounds, so an event
//! cannot be evicted from the linker's and this engine's in-memory
//! state before every stage that might still reference it has had a
//! chance to see the round that made it ancient.

pub mod ancestry;
pub mod fame;
pub mod round_received;
pub mod state;

use std::sync::Arc;

use ep_bus::{StageHandle, Wire, WindowPublisher, WindowReader};
use ep_linker::LinkerOutput;
use ep_types::{AddressBook, AncientMode, ConsensusConfig, ConsensusRound, NonAncientWindow};
use tokio::sync::Mutex;
use tracing::info;

use state::{ConsensusState, EventRecord};

/// Number of rounds a round's ancient threshold lags behind its own
/// emission, bounding how long this engine and the linker must keep an
/// event's in-memory state alive after it reaches consensus. Matches
/// the conventional Hashgraph default.
pub const ROUNDS_NON_ANCIENT: u64 = 26;

struct Engine {
    state: ConsensusState,
    book: AddressBook,
    config: ConsensusConfig,
    ancient_mode: AncientMode,
    /// Minimum generation/birth-round (depending on `ancient_mode`)
    /// among each emitted round's consensus events, kept only far
    /// enough back to compute the next ancient threshold.
    round_min_identifier: std::collections::BTreeMap<u64, u64>,
    window: NonAncientWindow,
}

impl Engine {
    fn new(book: AddressBook, config: ConsensusConfig, ancient_mode: AncientMode) -> Self {
        Self {
            state: ConsensusState::new(),
            book,
            config,
            ancient_mode,
            round_min_identifier: std::collections::BTreeMap::new(),
            window: NonAncientWindow::genesis(ancient_mode),
        }
    }

    fn identifier_of(&self, generation: u64, birth_round: u64) -> u64 {
        match self.ancient_mode {
            AncientMode::Generation => generation,
            AncientMode::BirthRound => birth_round,
        }
    }

    /// Links a new event into the engine's bookkeeping, classifies it,
    /// and drains as many newly-completed rounds as possible. Returns
    /// the rounds to emit downstream, in order.
    fn ingest(&mut self, linked: Arc<ep_types::LinkedEvent>, stream_sequence_number: u64) -> Vec<ConsensusRound> {
        let hash = linked.hash();
        let round_created = state::compute_round_created(&linked, &self.state, &self.book);
        let is_witness = state::is_witness(&linked, round_created, &self.state);

        self.state.events.insert(hash, EventRecord { linked: linked.clone(), stream_sequence_number, round_created, is_witness });
        self.state.pending_received.insert(hash);
        if is_witness {
            self.state.witnesses_by_round.entry(round_created).or_default().push(hash);
        }

        fame::decide_pending(&mut self.state, &self.book, &self.config);

        let pending: Vec<_> = self.state.pending_received.iter().copied().collect();
        for h in pending {
            if let Some(r) = round_received::try_assign(&self.state, h) {
                self.state.pending_received.remove(&h);
                self.state.received_buckets.entry(r).or_default().push(h);
            }
        }

        let mut emitted = Vec::new();
        loop {
            let round = self.state.next_round_to_emit;
            if !self.state.round_fully_decided(round) {
                break;
            }
            let Some(bucket) = self.state.received_buckets.remove(&round) else {
                break;
            };

            let min_generation = self.round_min_identifier.get(&round.saturating_sub(ROUNDS_NON_ANCIENT)).copied().unwrap_or(0);
            let consensus_round = round_received::build_round(&self.state, round, &bucket, min_generation);

            let round_min = bucket.iter().filter_map(|h| self.state.events.get(h)).map(|r| self.identifier_of(r.linked.generation(), r.linked.birth_round())).min().unwrap_or(0);
            self.round_min_identifier.insert(round, round_min);
            if let Some(lag_round) = round.checked_sub(ROUNDS_NON_ANCIENT) {
                self.round_min_identifier = self.round_min_identifier.split_off(&lag_round);
            }

            let new_threshold = self.round_min_identifier.get(&round.saturating_sub(ROUNDS_NON_ANCIENT)).copied().unwrap_or(0);
            self.window = self.window.advance(round, new_threshold, new_threshold);
            self.state.evict_ancient(&self.window);

            info!(round = round, events = consensus_round.len(), "consensus: round reached");
            ep_telemetry::CONSENSUS_ROUNDS_PRODUCED.inc();
            ep_telemetry::CONSENSUS_EVENTS_PER_ROUND.observe(consensus_round.len() as f64);

            self.state.next_round_to_emit += 1;
            emitted.push(consensus_round);
        }

        emitted
    }
}

/// Spawns the consensus engine. `to_application` receives every
/// emitted `ConsensusRound` in round order. The returned
/// [`WindowReader`] is cloned by every downstream stage that needs to
/// consult the non-ancient window.
pub fn spawn(book: AddressBook, config: ConsensusConfig, ancient_mode: AncientMode, input_queue_capacity: usize, to_application: Wire<ConsensusRound>) -> (Wire<LinkerOutput>, StageHandle, WindowReader) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let (publisher, reader) = WindowPublisher::new(NonAncientWindow::genesis(ancient_mode));
    let publisher = Arc::new(publisher);
    let engine = Arc::new(Mutex::new(Engine::new(book, config, ancient_mode)));

    let handle = ep_bus::spawn_sequential("consensus_engine", rx, pending, move |output: LinkerOutput| {
        let to_application = to_application.clone();
        let engine = engine.clone();
        let publisher = publisher.clone();
        async move {
            let mut engine = engine.lock().await;
            let rounds = engine.ingest(output.linked, output.stream_sequence_number);
            let window = engine.window;
            drop(engine);

            publisher.publish(window);
            for round in rounds {
                let _ = to_application.solder_to(round).await;
            }
        }
    });

    (inlet, handle, reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::{AddressBookEntry, EventBuilder, LinkedEvent, NodeId};

    fn book(ids: &[u64]) -> AddressBook {
        let entries = ids.iter().map(|&id| AddressBookEntry { node_id: NodeId(id), public_key: [0u8; 32], weight: 1, active: true }).collect();
        AddressBook::new(0, entries)
    }

    fn linked_root(creator: NodeId, time: u64, hash_byte: u8) -> Arc<LinkedEvent> {
        let mut hash = [0u8; 32];
        hash[0] = hash_byte;
        let event = EventBuilder::new(creator).time_created(time).build().with_hash(hash);
        Arc::new(LinkedEvent { event: Arc::new(event), self_parent: None, other_parent: None, round_created: 0, is_witness: false })
    }

    /// Builds a three-event single-creator chain. With a one-node
    /// address book, every new self-descendant trivially strongly-sees
    /// the previous event (its own weight is already a supermajority),
    /// so each event starts a new round: genesis is round 1's witness,
    /// `child` round 2's, `grandchild` round 3's. That gives round 1's
    /// witness a direct vote (at round 2) and a tally (at round 3),
    /// just enough for fame — and so round-received — to be decided.
    fn three_event_chain() -> (Arc<LinkedEvent>, Arc<LinkedEvent>, Arc<LinkedEvent>) {
        let genesis = linked_root(NodeId(1), 1, 1);
        let child_event = EventBuilder::new(NodeId(1)).self_parent(Some(genesis.event.descriptor())).time_created(2).build().with_hash([2u8; 32]);
        let child = Arc::new(LinkedEvent { event: Arc::new(child_event), self_parent: Some(genesis.clone()), other_parent: None, round_created: 0, is_witness: false });
        let grandchild_event = EventBuilder::new(NodeId(1)).self_parent(Some(child.event.descriptor())).time_created(3).build().with_hash([3u8; 32]);
        let grandchild = Arc::new(LinkedEvent { event: Arc::new(grandchild_event), self_parent: Some(child.clone()), other_parent: None, round_created: 0, is_witness: false });
        (genesis, child, grandchild)
    }

    #[tokio::test]
    async fn test_single_node_genesis_event_reaches_consensus() {
        let book = book(&[1]);
        let config = ConsensusConfig { coin_freq: 10, fame_election_depth_cap: 50 };
        let (to_app, mut app_rx, _p) = Wire::channel(8);
        let (inlet, handle, _reader) = spawn(book, config, AncientMode::BirthRound, 8, to_app);

        let (genesis, child, grandchild) = three_event_chain();
        for (i, e) in [genesis.clone(), child, grandchild].into_iter().enumerate() {
            inlet.solder_to(LinkerOutput { linked: e, stream_sequence_number: i as u64 }).await.unwrap();
        }
        handle.flush().await;

        let round = app_rx.try_recv();
        assert!(round.is_ok(), "expected at least one consensus round to be produced for a single-node chain");
        let round = round.unwrap();
        assert_eq!(round.round_number, 1);
        assert_eq!(round.keystone_event_hash, genesis.hash());
    }

    #[tokio::test]
    async fn test_window_advances_after_a_round_is_emitted() {
        let book = book(&[1]);
        let config = ConsensusConfig { coin_freq: 10, fame_election_depth_cap: 50 };
        let (to_app, mut app_rx, _p) = Wire::channel(8);
        let (inlet, handle, reader) = spawn(book, config, AncientMode::BirthRound, 8, to_app);

        assert_eq!(reader.current().latest_consensus_round, 0);

        let (genesis, child, grandchild) = three_event_chain();
        for (i, e) in [genesis, child, grandchild].into_iter().enumerate() {
            inlet.solder_to(LinkerOutput { linked: e, stream_sequence_number: i as u64 }).await.unwrap();
        }
        handle.flush().await;

        assert!(app_rx.try_recv().is_ok());
        assert_eq!(reader.current().latest_consensus_round, 1);
    }
}
