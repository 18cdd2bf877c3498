//! # Consensus Round
//!
//! The output of the consensus engine (§4.9): an ordered, immutable
//! batch of events that have reached consensus together, plus the
//! judge/snapshot bookkeeping needed downstream and for the wire
//! format 

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::{Event, Hash, NodeId};

/// A consensus timestamp, `{seconds, nanos}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl RoundTimestamp {
    #[must_use]
    pub fn plus_nanos(&self, nanos: i64) -> Self {
        let total = self.seconds as i64 * 1_000_000_000 + self.nanos as i64 + nanos;
        Self {
            seconds: total.div_euclid(1_000_000_000),
            nanos: total.rem_euclid(1_000_000_000) as i32,
        }
    }
}

/// One witness judged famous (or not) in a round, carried in the
/// round's snapshot so a restarted node can resume consensus state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub creator: NodeId,
    pub hash: Hash,
}

/// `{judges, minRoundGeneration}` snapshot carried on every emitted
/// round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub judges: Vec<JudgeRecord>,
    pub min_round_generation: u64,
}

/// A fully decided consensus round. Immutable once constructed; this is
/// the boundary past which the application state machine may act.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRound {
    pub round_number: u64,
    /// Events in this round, in final deterministic consensus order.
    pub consensus_events: Vec<Arc<Event>>,
    pub consensus_timestamp: RoundTimestamp,
    /// The last event in the round's deterministic order; its
    /// durability in the PCES gates release of this round.
    pub keystone_event_hash: Hash,
    pub keystone_event_sequence_number: u64,
    pub snapshot: ConsensusSnapshot,
}

impl ConsensusRound {
    #[must_use]
    pub fn len(&self) -> usize {
        self.consensus_events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consensus_events.is_empty()
    }
}
