//! Prometheus metrics for the consensus event-intake pipeline.
//!
//! All metrics follow the naming convention: `ep_<stage>_<metric>_<unit>`.
//! Per-stage counters (items processed, items dropped, queue depth) are
//! the SUPPLEMENT feature this repo adds beyond spec.md's explicit
//! scope, grounded on this same registry/lazy_static pattern.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // HASHER / POST-HASH COLLECTOR (4.2)
    // =========================================================================

    /// Total events accepted at the hasher's input.
    pub static ref EVENTS_INGESTED: Counter = Counter::new(
        "ep_hasher_events_ingested_total",
        "Total events accepted at the hasher input"
    ).expect("metric creation failed");

    /// Total events hashed and re-ordered by the post-hash collector.
    pub static ref EVENTS_HASHED: Counter = Counter::new(
        "ep_hasher_events_hashed_total",
        "Total events hashed and emitted by the post-hash collector"
    ).expect("metric creation failed");

    /// Event hashing duration.
    pub static ref EVENT_HASH_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ep_hasher_hash_duration_seconds",
            "Time spent hashing a single event"
        ).buckets(exponential_buckets(0.00001, 2.0, 15).unwrap())
    ).expect("metric creation failed");

    // =========================================================================
    // INTERNAL VALIDATOR / DEDUPLICATOR / SIGNATURE VALIDATOR (4.3-4.5)
    // =========================================================================

    /// Events rejected by internal validation, by reason.
    pub static ref EVENTS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("ep_validator_events_rejected_total", "Events rejected by the internal validator"),
        &["reason"]
    ).expect("metric creation failed");

    /// Events dropped as duplicates.
    pub static ref EVENTS_DEDUPLICATED: Counter = Counter::new(
        "ep_dedup_events_dropped_total",
        "Total duplicate events dropped"
    ).expect("metric creation failed");

    /// Signature verifications by result.
    pub static ref SIGNATURE_VERIFICATIONS: CounterVec = CounterVec::new(
        Opts::new("ep_sigcheck_verifications_total", "Signature verifications by result"),
        &["result"]  // valid / invalid
    ).expect("metric creation failed");

    // =========================================================================
    // ORPHAN BUFFER / FUTURE EVENT BUFFER (4.6, 4.13)
    // =========================================================================

    /// Events currently held in the orphan buffer.
    pub static ref ORPHANS_BUFFERED: Gauge = Gauge::new(
        "ep_orphan_buffer_events_pending",
        "Events currently buffered awaiting a missing parent"
    ).expect("metric creation failed");

    /// Orphaned events released once their parent arrived.
    pub static ref ORPHANS_RELEASED: Counter = Counter::new(
        "ep_orphan_buffer_events_released_total",
        "Total orphaned events released after parent resolution"
    ).expect("metric creation failed");

    /// Events currently held in the future event buffer.
    pub static ref FUTURE_EVENTS_BUFFERED: Gauge = Gauge::new(
        "ep_future_buffer_events_pending",
        "Events currently buffered awaiting their birth round"
    ).expect("metric creation failed");

    // =========================================================================
    // SHADOWGRAPH (4.12)
    // =========================================================================

    /// Events currently mirrored in the shadowgraph sync store.
    pub static ref SHADOWGRAPH_EVENTS_STORED: Gauge = Gauge::new(
        "ep_shadowgraph_events_stored",
        "Events currently mirrored in the shadowgraph for gossip sync"
    ).expect("metric creation failed");

    // =========================================================================
    // PCES: SEQUENCER, WRITER, DURABILITY NEXUS (4.7, 4.10, 4.11)
    // =========================================================================

    /// Total events appended to the pre-consensus event stream.
    pub static ref PCES_EVENTS_WRITTEN: Counter = Counter::new(
        "ep_pces_events_written_total",
        "Total events appended to PCES segment files"
    ).expect("metric creation failed");

    /// Total segment files rotated.
    pub static ref PCES_SEGMENTS_ROTATED: Counter = Counter::new(
        "ep_pces_segments_rotated_total",
        "Total PCES segment file rotations"
    ).expect("metric creation failed");

    /// Total fsync failures (fatal-class).
    pub static ref PCES_FSYNC_FAILURES: Counter = Counter::new(
        "ep_pces_fsync_failures_total",
        "Total fsync failures while durably appending events"
    ).expect("metric creation failed");

    /// Latest durable sequence number acknowledged by the durability nexus.
    pub static ref LATEST_DURABLE_SEQUENCE_NUMBER: Gauge = Gauge::new(
        "ep_pces_latest_durable_sequence_number",
        "Highest PCES stream sequence number known to be fsynced"
    ).expect("metric creation failed");

    // =========================================================================
    // IN-ORDER LINKER / CONSENSUS ENGINE (4.8, 4.9)
    // =========================================================================

    /// Total consensus rounds produced.
    pub static ref CONSENSUS_ROUNDS_PRODUCED: Counter = Counter::new(
        "ep_consensus_rounds_produced_total",
        "Total consensus rounds emitted by the consensus engine"
    ).expect("metric creation failed");

    /// Events per consensus round.
    pub static ref CONSENSUS_EVENTS_PER_ROUND: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ep_consensus_events_per_round",
            "Number of events in each emitted consensus round"
        ).buckets(exponential_buckets(1.0, 2.0, 12).unwrap())
    ).expect("metric creation failed");

    // =========================================================================
    // EVENT CREATION MANAGER (4.14)
    // =========================================================================

    /// Total events created by this node.
    pub static ref EVENTS_CREATED: Counter = Counter::new(
        "ep_event_creation_events_created_total",
        "Total events created locally by the event-creation manager"
    ).expect("metric creation failed");

    /// Events this node wanted to create but withheld due to rate limiting.
    pub static ref EVENT_CREATION_RATE_LIMITED: Counter = Counter::new(
        "ep_event_creation_rate_limited_total",
        "Total event-creation attempts withheld by the token bucket"
    ).expect("metric creation failed");

    // =========================================================================
    // CROSS-STAGE WIRING
    // =========================================================================

    /// Current queue depth, per stage.
    pub static ref STAGE_QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new("ep_stage_queue_depth", "Pending items in a stage's input queue"),
        &["stage"]
    ).expect("metric creation failed");

    /// Errors raised in a stage, by error type.
    pub static ref STAGE_ERRORS: CounterVec = CounterVec::new(
        Opts::new("ep_stage_errors_total", "Errors raised by a stage, by type"),
        &["stage", "error_type"]
    ).expect("metric creation failed");
}

/// Handle for the metrics registry.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a metric is already
/// registered under the same name.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_INGESTED.clone()),
        Box::new(EVENTS_HASHED.clone()),
        Box::new(EVENT_HASH_DURATION.clone()),
        Box::new(EVENTS_REJECTED.clone()),
        Box::new(EVENTS_DEDUPLICATED.clone()),
        Box::new(SIGNATURE_VERIFICATIONS.clone()),
        Box::new(ORPHANS_BUFFERED.clone()),
        Box::new(ORPHANS_RELEASED.clone()),
        Box::new(FUTURE_EVENTS_BUFFERED.clone()),
        Box::new(SHADOWGRAPH_EVENTS_STORED.clone()),
        Box::new(PCES_EVENTS_WRITTEN.clone()),
        Box::new(PCES_SEGMENTS_ROTATED.clone()),
        Box::new(PCES_FSYNC_FAILURES.clone()),
        Box::new(LATEST_DURABLE_SEQUENCE_NUMBER.clone()),
        Box::new(CONSENSUS_ROUNDS_PRODUCED.clone()),
        Box::new(CONSENSUS_EVENTS_PER_ROUND.clone()),
        Box::new(EVENTS_CREATED.clone()),
        Box::new(EVENT_CREATION_RATE_LIMITED.clone()),
        Box::new(STAGE_QUEUE_DEPTH.clone()),
        Box::new(STAGE_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format, served at
/// `telemetry.metricsAddr`.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if encoding fails.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    #[must_use]
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
