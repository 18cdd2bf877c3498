//! # Error Taxonomy
//!
//! A flat enum of the failure classes produced along the event-intake
//! pipeline, built on `thiserror` so every variant gets a
//! `std::error::Error` impl `node-runtime` can log with
//! `tracing::error!`.

use thiserror::Error;

use crate::event::{Hash, NodeId};

/// Errors produced anywhere along the event-intake pipeline.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// An event failed internal validation (malformed generation,
    /// non-monotone `time_created`, exceeds the maximum transaction
    /// size, or a signature that does not verify).
    #[error("malformed event from {creator:?}: {reason}")]
    MalformedEvent { creator: NodeId, reason: String },

    /// An event references a parent that has not yet been seen and is
    /// not ancient; it is buffered, not rejected.
    #[error("event {hash:?} is an orphan, missing parent")]
    Orphan { hash: Hash },

    /// A signature failed to verify against the address book entry for
    /// its claimed creator.
    #[error("signature verification failed for node {creator:?}")]
    SignatureVerificationFailed { creator: NodeId },

    /// The claimed creator is not present (or not active) in the
    /// address book effective at this event's round.
    #[error("unknown or inactive creator {creator:?}")]
    UnknownCreator { creator: NodeId },

    /// A stage-internal invariant was violated; this indicates a bug,
    /// not a malicious or malformed input, and is not recoverable by
    /// retrying.
    #[error("invariant violation in {stage}: {detail}")]
    InvariantViolation { stage: &'static str, detail: String },

    /// The pre-consensus event stream failed to write or read a
    /// segment file.
    #[error("pre-consensus event stream I/O error: {0}")]
    PcesIo(#[from] std::io::Error),

    /// A segment file failed its checksum or header validation on
    /// replay.
    #[error("pre-consensus event stream corruption in {path}: {reason}")]
    PcesCorruption { path: String, reason: String },

    /// Free disk space fell below `pces.minFreeSpace`; the writer must
    /// halt rather than risk a truncated, undetectable write.
    #[error("disk space below minimum free space threshold ({available} bytes free)")]
    DiskSpaceExhausted { available: u64 },

    /// fsync failed repeatedly; durability can no longer be guaranteed
    /// and the node must halt.
    #[error("fsync failed after {attempts} attempts: {source}")]
    FsyncFailed {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline is shutting down; in-flight work should be
    /// abandoned rather than processed further.
    #[error("pipeline is shutting down")]
    ShuttingDown,
}

/// Convenience alias used throughout the pipeline crates.
pub type IntakeResult<T> = Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_event_display() {
        let err = IntakeError::MalformedEvent {
            creator: NodeId(3),
            reason: "generation must be monotone".to_string(),
        };
        assert!(err.to_string().contains("NodeId(3)"));
    }

    #[test]
    fn test_orphan_is_not_fatal_variant() {
        let err = IntakeError::Orphan { hash: [0u8; 32] };
        assert!(matches!(err, IntakeError::Orphan { .. }));
    }
}
