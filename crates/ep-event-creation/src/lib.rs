//! # Event Creation Manager
//!
//! Creates this node's own events: picks a self-parent
//! (this node's own latest event), an other-parent (the least-recently
//! chosen active creator with a non-ancient mirrored event — witness
//! status itself is [`ep_consensus`]-internal bookkeeping, not exposed
//! outside the engine, so ancestry reachability stands in for it here),
//! assigns `birth_round` from the window's latest consensus round,
//! timestamps, signs, and re-injects the result into the internal
//! validator, closing the feedback loop. A token bucket ties creation
//! rate to how fast the pipeline drains, the same refillable-bucket
//! shape used for per-peer rate limiting elsewhere in this pipeline.
//!
//! Wired downstream of the future event buffer: every future event the
//! buffer releases both re-enters the validator unchanged and gives
//! this stage an opportunity to attempt creating a new self-event,
//! rate limit permitting.

use std::sync::Arc;

use ep_bus::{InjectWire, StageHandle, Wire, WindowReader};
use ep_shadowgraph::ShadowgraphHandle;
use ep_types::{AddressBook, Event, EventBuilder, Hasher, LinkedEvent, NodeId, Signer};
use tokio::sync::Mutex;
use tracing::debug;

/// Token bucket tying event-creation rate to pipeline drain speed.
/// Refilled by one unit per trigger (one future-event release); a
/// backed-up pipeline delivers fewer triggers, so the bucket drains
/// without any separate backpressure signal from the transaction pool.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_trigger: f64,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_trigger: f64) -> Self {
        Self { tokens: capacity, capacity, refill_per_trigger }
    }

    fn try_take(&mut self) -> bool {
        self.tokens = (self.tokens + self.refill_per_trigger).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventCreationConfig {
    pub input_queue_capacity: usize,
    pub token_bucket_capacity: f64,
    pub token_bucket_refill_per_trigger: f64,
}

impl Default for EventCreationConfig {
    fn default() -> Self {
        Self { input_queue_capacity: 256, token_bucket_capacity: 10.0, token_bucket_refill_per_trigger: 1.0 }
    }
}

struct CreationState {
    self_parent: Option<Arc<LinkedEvent>>,
    last_chosen_tick: std::collections::HashMap<NodeId, u64>,
    tick: u64,
    last_time_created: u64,
    bucket: TokenBucket,
}

impl CreationState {
    fn new(config: &EventCreationConfig) -> Self {
        Self {
            self_parent: None,
            last_chosen_tick: std::collections::HashMap::new(),
            tick: 0,
            last_time_created: 0,
            bucket: TokenBucket::new(config.token_bucket_capacity, config.token_bucket_refill_per_trigger),
        }
    }
}

/// Picks the active creator (other than `self_id`) with a mirrored
/// non-ancient event that was least recently chosen as an other-parent.
async fn choose_other_parent(
    self_id: NodeId,
    book: &AddressBook,
    shadowgraph: &ShadowgraphHandle,
    last_chosen_tick: &std::collections::HashMap<NodeId, u64>,
) -> Option<Arc<LinkedEvent>> {
    let mut best_rank = None;
    let mut best_event = None;
    for candidate in book.active_node_ids() {
        if candidate == self_id {
            continue;
        }
        let Some(event) = shadowgraph.latest_event_of(candidate).await else { continue };
        let rank = last_chosen_tick.get(&candidate).copied().unwrap_or(0);
        if best_rank.is_none() || Some(rank) < best_rank {
            best_rank = Some(rank);
            best_event = Some(event);
        }
    }
    best_event
}

fn finalize(event: Event, hasher: &dyn Hasher, signer: &dyn Signer) -> Option<Event> {
    let bytes = event.canonical_bytes();
    let signature = signer.sign(&bytes)?;
    let mut event = event;
    event.signature = signature;
    let hash = hasher.hash(&bytes);
    Some(event.with_hash(hash))
}

/// Spawns the event creation manager. `trigger_in` is wired from the
/// future event buffer's output; every item both re-enters
/// `to_validator` unchanged and gives this stage a chance to create a
/// new self-event, subject to the token bucket.
pub fn spawn(
    self_id: NodeId,
    book: AddressBook,
    hasher: Arc<dyn Hasher>,
    signer: Arc<dyn Signer>,
    window: WindowReader,
    shadowgraph: ShadowgraphHandle,
    config: EventCreationConfig,
    to_validator: InjectWire<Event>,
) -> (Wire<Event>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(config.input_queue_capacity);
    let state = Arc::new(Mutex::new(CreationState::new(&config)));

    let handle = ep_bus::spawn_sequential("event_creation_manager", rx, pending, move |released: Event| {
        let to_validator = to_validator.clone();
        let window = window.clone();
        let shadowgraph = shadowgraph.clone();
        let hasher = hasher.clone();
        let signer = signer.clone();
        let book = book.clone();
        let state = state.clone();
        async move {
            to_validator.solder_inject(released);

            let mut state = state.lock().await;
            state.tick += 1;
            let tick = state.tick;

            if !state.bucket.try_take() {
                ep_telemetry::EVENT_CREATION_RATE_LIMITED.inc();
                return;
            }

            let current_window = window.current();
            let other_parent = choose_other_parent(self_id, &book, &shadowgraph, &state.last_chosen_tick).await;

            let self_parent_descriptor = state.self_parent.as_ref().map(|e| e.event.descriptor());
            let other_parent_descriptor = other_parent.as_ref().map(|e| e.event.descriptor());
            let time_created = state.last_time_created.max(current_window.latest_consensus_round) + 1;

            let unsigned = EventBuilder::new(self_id)
                .self_parent(self_parent_descriptor)
                .other_parent(other_parent_descriptor)
                .birth_round(current_window.latest_consensus_round)
                .time_created(time_created)
                .build();

            let Some(finalized) = finalize(unsigned, hasher.as_ref(), signer.as_ref()) else {
                debug!("event creation: local signer cannot sign, skipping self-event creation");
                return;
            };

            state.last_time_created = time_created;
            if let Some(other) = &other_parent {
                state.last_chosen_tick.insert(other.creator_id(), tick);
            }

            ep_telemetry::EVENTS_CREATED.inc();
            to_validator.solder_inject(finalized);
        }
    });

    (inlet, handle)
}
