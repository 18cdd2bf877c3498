//! # Internal Event Validator
//!
//! Sequential stage rejecting (drop + count) events that violate
//! structural invariants before deduplication or signature checking
//! ever see them: self-referential parents, parent generation
//! greater than or equal to the child's, non-monotone per-creator
//! timestamps, oversized transaction payloads, and birth rounds too far
//! beyond the current window.

use std::collections::HashMap;
use std::sync::Arc;

use ep_bus::{StageHandle, Wire, WindowReader};
use ep_types::{Event, IntakeError, NodeId};
use tokio::sync::Mutex;
use tracing::warn;

/// Tunables for structural validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    /// Maximum total bytes across an event's transaction payloads.
    pub max_transaction_bytes: usize,
    /// How many rounds beyond the window's latest consensus round a
    /// birth round may claim before being rejected outright (events
    /// within tolerance go to the future event buffer instead; only
    /// events *beyond* tolerance are malformed here).
    pub birth_round_tolerance: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_transaction_bytes: 6 * 1024 * 1024,
            birth_round_tolerance: 1,
        }
    }
}

struct ValidatorState {
    last_time_created: HashMap<NodeId, u64>,
}

fn validate(event: &Event, window: &ep_types::NonAncientWindow, config: &ValidatorConfig, state: &mut ValidatorState) -> Result<(), IntakeError> {
    let own_hash = event.hash.expect("validator runs downstream of the hasher");

    if let Some(sp) = &event.self_parent {
        if sp.hash == own_hash {
            return Err(IntakeError::MalformedEvent {
                creator: event.creator_id,
                reason: "self-parent references the event itself".into(),
            });
        }
        if sp.generation >= event.generation {
            return Err(IntakeError::MalformedEvent {
                creator: event.creator_id,
                reason: "self-parent generation not less than child's".into(),
            });
        }
    }
    if let Some(op) = &event.other_parent {
        if op.hash == own_hash {
            return Err(IntakeError::MalformedEvent {
                creator: event.creator_id,
                reason: "other-parent references the event itself".into(),
            });
        }
        if op.generation >= event.generation {
            return Err(IntakeError::MalformedEvent {
                creator: event.creator_id,
                reason: "other-parent generation not less than child's".into(),
            });
        }
    }

    let last = state.last_time_created.get(&event.creator_id).copied().unwrap_or(0);
    if event.time_created < last {
        return Err(IntakeError::MalformedEvent {
            creator: event.creator_id,
            reason: "time_created is not monotone for this creator".into(),
        });
    }
    state.last_time_created.insert(event.creator_id, event.time_created);

    let payload_bytes: usize = event.transactions.iter().map(Vec::len).sum();
    if payload_bytes > config.max_transaction_bytes {
        return Err(IntakeError::MalformedEvent {
            creator: event.creator_id,
            reason: format!("transaction payload {payload_bytes} bytes exceeds limit"),
        });
    }

    let max_allowed_birth_round = window.latest_consensus_round + config.birth_round_tolerance;
    if event.birth_round > max_allowed_birth_round {
        return Err(IntakeError::MalformedEvent {
            creator: event.creator_id,
            reason: format!(
                "birth round {} exceeds window tolerance (max {max_allowed_birth_round})",
                event.birth_round
            ),
        });
    }

    Ok(())
}

/// Spawns the internal validator as a sequential stage. Valid events are
/// soldered unchanged onto `out`; invalid events are dropped after being
/// logged and counted (malformed events are never fatal).
pub fn spawn(
    window: WindowReader,
    config: ValidatorConfig,
    input_queue_capacity: usize,
    out: Wire<Event>,
) -> (Wire<Event>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let state = Arc::new(Mutex::new(ValidatorState {
        last_time_created: HashMap::new(),
    }));

    let handle = ep_bus::spawn_sequential("internal_validator", rx, pending, move |event: Event| {
        let out = out.clone();
        let window = window.clone();
        let state = state.clone();
        async move {
            let current_window = window.current();
            let mut state = state.lock().await;
            match validate(&event, &current_window, &config, &mut state) {
                Ok(()) => {
                    let _ = out.solder_to(event).await;
                }
                Err(err) => {
                    warn!(error = %err, "internal validator rejected event");
                    ep_telemetry::EVENTS_REJECTED.with_label_values(&["structural"]).inc();
                }
            }
        }
    });

    (inlet, handle)
}
