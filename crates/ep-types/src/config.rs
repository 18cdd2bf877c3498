//! # Pipeline Configuration
//!
//! Sizing and tuning knobs for every pipeline stage, plus the segment
//! storage and wiring defaults this repository adds, collected into one
//! struct-of-structs with `Default` impls.

use std::path::PathBuf;

use crate::window::AncientMode;

/// Complete configuration for the event-intake pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub wiring: WiringConfig,
    pub orphan_buffer: OrphanBufferConfig,
    pub future_event_buffer: FutureEventBufferConfig,
    pub consensus: ConsensusConfig,
    pub pces: PcesConfig,
    pub ancient_mode: AncientMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wiring: WiringConfig::default(),
            orphan_buffer: OrphanBufferConfig::default(),
            future_event_buffer: FutureEventBufferConfig::default(),
            consensus: ConsensusConfig::default(),
            pces: PcesConfig::default(),
            ancient_mode: AncientMode::BirthRound,
        }
    }
}

/// Stage/wire framework sizing knobs.
#[derive(Debug, Clone)]
pub struct WiringConfig {
    /// Capacity of the hasher/collector backpressure object counter
    /// (`eventHasherUnhandledCapacity`).
    pub event_hasher_unhandled_capacity: usize,
    /// Default bounded-queue capacity for sequential stages not
    /// otherwise configured.
    pub default_queue_capacity: usize,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            event_hasher_unhandled_capacity: 5_000,
            default_queue_capacity: 2_000,
        }
    }
}

/// `orphanBufferCapacity`.
#[derive(Debug, Clone)]
pub struct OrphanBufferConfig {
    pub capacity: usize,
}

impl Default for OrphanBufferConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// `futureEventBufferCapacity`.
#[derive(Debug, Clone)]
pub struct FutureEventBufferConfig {
    pub capacity: usize,
}

impl Default for FutureEventBufferConfig {
    fn default() -> Self {
        Self { capacity: 2_000 }
    }
}

/// `consensus.coinFreq` and the fame-election depth cap; defaults are
/// recorded in DESIGN.md.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Rounds between coin-round votes.
    pub coin_freq: u64,
    /// Maximum number of election rounds before a witness's fame is
    /// forced by a coin round, bounding worst-case election latency.
    pub fame_election_depth_cap: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            coin_freq: 10,
            fame_election_depth_cap: 50,
        }
    }
}

/// PCES segment file knobs.
#[derive(Debug, Clone)]
pub struct PcesConfig {
    /// Directory segment files are written to and read from on replay.
    pub segment_directory: PathBuf,
    /// Max `birthRound` or `generation` span per file
    /// (`pces.maxSegmentSpan`).
    pub max_segment_span: u64,
    /// Bytes below which the writer signals fatal (`pces.minFreeSpace`).
    pub min_free_space: u64,
    /// Backoff between fsync retry attempts.
    pub fsync_retry_backoff_ms: u64,
    /// Number of fsync attempts before the node halts.
    pub fsync_max_attempts: u32,
}

impl Default for PcesConfig {
    fn default() -> Self {
        Self {
            segment_directory: PathBuf::from("./pces"),
            max_segment_span: 1_000,
            min_free_space: 100 * 1024 * 1024,
            fsync_retry_backoff_ms: 50,
            fsync_max_attempts: 3,
        }
    }
}
