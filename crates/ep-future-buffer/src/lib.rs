//! # Future Event Buffer
//!
//! Holds events whose `birth_round` is exactly one round ahead of the
//! window's latest consensus round — too new to enter the
//! pipeline yet, but plausible. Released once the window advances far
//! enough to make them current. Events more than one round ahead are
//! dropped outright: no honest creator assigns a birth round that far
//! beyond the round it observed at creation time.

use std::collections::BTreeMap;

use ep_bus::{StageHandle, Wire, WindowReader};
use ep_types::Event;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct FutureBufferConfig {
    pub input_queue_capacity: usize,
}

impl Default for FutureBufferConfig {
    fn default() -> Self {
        Self { input_queue_capacity: 1024 }
    }
}

struct FutureBufferState {
    /// Buffered events keyed by the round at which they stop being
    /// future (their own `birth_round`), released once
    /// `latest_consensus_round` reaches that key.
    by_target_round: BTreeMap<u64, Vec<Event>>,
    last_window_round: u64,
}

impl FutureBufferState {
    fn new() -> Self {
        Self { by_target_round: BTreeMap::new(), last_window_round: 0 }
    }
}

/// Spawns the future event buffer as a sequential stage.
pub fn spawn(window: WindowReader, config: FutureBufferConfig, out: Wire<Event>) -> (Wire<Event>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(config.input_queue_capacity);
    let state = std::sync::Arc::new(Mutex::new(FutureBufferState::new()));

    let handle = ep_bus::spawn_sequential("future_event_buffer", rx, pending, move |event: Event| {
        let out = out.clone();
        let window = window.clone();
        let state = state.clone();
        async move {
            let current = window.current();
            let mut state = state.lock().await;

            if current.latest_consensus_round > state.last_window_round {
                state.last_window_round = current.latest_consensus_round;
                let ready: Vec<u64> = state.by_target_round.range(..=current.latest_consensus_round).map(|(round, _)| *round).collect();
                for round in ready {
                    if let Some(events) = state.by_target_round.remove(&round) {
                        for event in events {
                            ep_telemetry::FUTURE_EVENTS_BUFFERED.set(state.by_target_round.values().map(Vec::len).sum::<usize>() as f64);
                            if out.solder_to(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            let ahead = event.birth_round.saturating_sub(current.latest_consensus_round);
            if ahead == 0 {
                let _ = out.solder_to(event).await;
            } else if ahead == 1 {
                debug!(birth_round = event.birth_round, latest_round = current.latest_consensus_round, "future buffer: holding event one round ahead");
                state.by_target_round.entry(event.birth_round).or_default().push(event);
                ep_telemetry::FUTURE_EVENTS_BUFFERED.set(state.by_target_round.values().map(Vec::len).sum::<usize>() as f64);
            } else {
                warn!(birth_round = event.birth_round, latest_round = current.latest_consensus_round, ahead, "future buffer: dropping event too far ahead of window");
                ep_telemetry::STAGE_ERRORS.with_label_values(&["future_event_buffer", "birth_round_too_far_ahead"]).inc();
            }
        }
    });

    (inlet, handle)
}
