//! # Non-Ancient Event Window
//!
//! The window defines which events are still capable of influencing
//! consensus. There is a single latest value; the event-window-manager
//! is its sole writer and every other stage reads it read-mostly,
//! applying updates only between events (never mid-event)

use serde::{Deserialize, Serialize};

/// Which identifier ancient-ness is measured against. Set once at
/// genesis and never changed at runtime ( — this repo
/// forbids the "switch mode at runtime" FUTURE WORK some sources
/// reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AncientMode {
    Generation,
    BirthRound,
}

/// Tuple `{latestConsensusRound, minNonAncientGenerationOrBirthRound,
/// minRoundGeneration, ancientMode}` from 
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonAncientWindow {
    /// The most recent consensus round this window was computed from.
    pub latest_consensus_round: u64,
    /// The minimum generation (GENERATION mode) or birth round
    /// (BIRTH_ROUND mode) still eligible to influence consensus.
    pub min_non_ancient_identifier: u64,
    /// The minimum round any non-ancient event may claim as
    /// `round_created`, used to bound consensus bookkeeping.
    pub min_round_generation: u64,
    pub ancient_mode: AncientMode,
}

impl NonAncientWindow {
    /// The genesis window: nothing is ancient yet.
    #[must_use]
    pub fn genesis(ancient_mode: AncientMode) -> Self {
        Self {
            latest_consensus_round: 0,
            min_non_ancient_identifier: 0,
            min_round_generation: 0,
            ancient_mode,
        }
    }

    /// The ancient identifier of an event: its generation or birth
    /// round, depending on `ancient_mode`.
    #[must_use]
    pub fn ancient_identifier(&self, generation: u64, birth_round: u64) -> u64 {
        match self.ancient_mode {
            AncientMode::Generation => generation,
            AncientMode::BirthRound => birth_round,
        }
    }

    /// `true` iff an event with the given generation/birth-round is
    /// ancient under the current window.
    #[must_use]
    pub fn is_ancient(&self, generation: u64, birth_round: u64) -> bool {
        self.ancient_identifier(generation, birth_round) < self.min_non_ancient_identifier
    }

    /// Returns a new window advanced to the given round and minimum
    /// identifier. Never goes backwards (a malformed or duplicate
    /// window update is silently clamped by the caller, which only
    /// ever calls this with a strictly increasing round).
    #[must_use]
    pub fn advance(&self, latest_consensus_round: u64, min_non_ancient_identifier: u64, min_round_generation: u64) -> Self {
        Self {
            latest_consensus_round,
            min_non_ancient_identifier,
            min_round_generation,
            ancient_mode: self.ancient_mode,
        }
    }
}
