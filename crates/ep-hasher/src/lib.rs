//! # Hasher & Post-Hash Collector
//!
//! "Parallel hash, serial emit". The hasher is a concurrent
//! stage: each worker computes an event's canonical hash independently,
//! so completion order does not match submission order. The post-hash
//! collector is sequential and restores that order before any
//! downstream stage sees an event, so everything past this point may
//! assume strict FIFO.
//!
//! The [`ep_bus::BackpressureObjectCounter`] on-ramped at [`HasherInlet::submit`]
//! and off-ramped once the collector emits is the one counter in the
//! pipeline spanning two stages whose queues cannot back-pressure each
//! other directly, because the hasher fans out across workers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ep_bus::{BackpressureObjectCounter, CapacityPermit, PendingTracker, StageHandle, Wire};
use ep_types::{Event, Hash, Hasher};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// A `sha2`-backed `Hasher` adapter. The only concrete cryptographic
/// implementation in this crate; everything else depends on the
/// `ep_types::Hasher` trait so an alternate digest can be swapped in
/// without touching the stage wiring.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn hash(&self, bytes: &[u8]) -> Hash {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

/// An event in flight between the hasher and the post-hash collector,
/// carrying the backpressure permit and the sequence number the
/// collector uses to restore input order.
struct InFlight {
    sequence: u64,
    event: Event,
    _permit: CapacityPermit,
}

/// The inlet side: assigns a monotone sequence number and on-ramps the
/// shared backpressure counter before handing the event to the hasher's
/// input queue. Held by whichever upstream stage feeds the hasher
/// (gossip intake or the PCES replayer).
#[derive(Clone)]
pub struct HasherInlet {
    next_sequence: Arc<AtomicU64>,
    counter: BackpressureObjectCounter,
    to_hasher: Wire<InFlight>,
}

impl HasherInlet {
    /// On-ramps the shared counter (blocking if it is at capacity) and
    /// enqueues `event` for hashing.
    pub async fn submit(&self, event: Event) -> Result<(), ep_bus::SolderError> {
        let permit = self.counter.on_ramp().await;
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        ep_telemetry::EVENTS_INGESTED.inc();
        self.to_hasher
            .solder_to(InFlight {
                sequence,
                event,
                _permit: permit,
            })
            .await
    }
}

/// Everything needed to run the hasher and its post-hash collector as
/// one logical unit.
pub struct HasherStage {
    pub inlet: HasherInlet,
    pub hasher_handle: StageHandle,
    pub collector_handle: StageHandle,
}

/// Wires up the concurrent hasher feeding a sequential-ordered
/// post-hash collector, whose output is soldered onto `out`.
///
/// `workers` is the hasher's worker-pool size, resolved by the caller
/// against available parallelism; `counter_capacity` is
/// `eventHasherUnhandledCapacity`.
pub fn spawn(
    workers: usize,
    counter_capacity: usize,
    hasher: Arc<dyn Hasher>,
    input_queue_capacity: usize,
    out: Wire<Event>,
) -> HasherStage {
    let (to_hasher, hasher_rx, hasher_pending) = Wire::channel(input_queue_capacity);
    let (to_collector, collector_rx, collector_pending) = Wire::channel(input_queue_capacity);

    let hasher_handle = ep_bus::spawn_concurrent("hasher", hasher_rx, hasher_pending, workers, {
        let hasher = hasher.clone();
        let to_collector = to_collector.clone();
        move |item: InFlight| {
            let hasher = hasher.clone();
            let to_collector = to_collector.clone();
            async move {
                let _timer = ep_telemetry::time_histogram!(ep_telemetry::EVENT_HASH_DURATION);
                let bytes = item.event.canonical_bytes();
                let digest = hasher.hash(&bytes);
                let hashed = item.event.with_hash(digest);
                let _ = to_collector
                    .solder_to(InFlight {
                        sequence: item.sequence,
                        event: hashed,
                        _permit: item._permit,
                    })
                    .await;
            }
        }
    });

    let buffer: Arc<AsyncMutex<BTreeMap<u64, InFlight>>> = Arc::new(AsyncMutex::new(BTreeMap::new()));
    let expected_next = Arc::new(AtomicU64::new(0));
    let collector_handle = ep_bus::spawn_sequential("post_hash_collector", collector_rx, collector_pending, {
        let out = out.clone();
        move |item: InFlight| {
            let out = out.clone();
            let buffer = buffer.clone();
            let expected_next = expected_next.clone();
            async move {
                let mut guard = buffer.lock().await;
                guard.insert(item.sequence, item);
                loop {
                    let next = expected_next.load(Ordering::Relaxed);
                    let Some(ready) = guard.remove(&next) else {
                        break;
                    };
                    expected_next.store(next + 1, Ordering::Relaxed);
                    ep_telemetry::EVENTS_HASHED.inc();
                    debug!(sequence = next, "post-hash collector emitting in order");
                    // permit drops here, off-ramping the shared counter
                    // only after this event has left the collector.
                    let InFlight { event, _permit, .. } = ready;
                    let _ = out.solder_to(event).await;
                }
            }
        }
    });

    let inlet = HasherInlet {
        next_sequence: Arc::new(AtomicU64::new(0)),
        counter: BackpressureObjectCounter::new(counter_capacity),
        to_hasher,
    };

    HasherStage {
        inlet,
        hasher_handle,
        collector_handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::EventBuilder;
    use ep_types::NodeId;

    fn sample_event(n: u64) -> Event {
        EventBuilder::new(NodeId(0))
            .time_created(n)
            .transactions(vec![vec![n as u8]])
            .build()
    }

    #[tokio::test]
    async fn test_hasher_collector_restores_order() {
        let (out, mut out_rx, _out_pending) = Wire::channel(32);
        let stage = spawn(4, 16, Arc::new(Sha256Hasher), 32, out);

        for i in 0..20u64 {
            stage.inlet.submit(sample_event(i)).await.unwrap();
        }
        stage.hasher_handle.flush().await;
        stage.collector_handle.flush().await;

        let mut seen = Vec::new();
        while let Ok(event) = out_rx.try_recv() {
            seen.push(event.time_created);
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_hashed_event_carries_stamp() {
        let (out, mut out_rx, _out_pending) = Wire::channel(4);
        let stage = spawn(1, 4, Arc::new(Sha256Hasher), 4, out);
        stage.inlet.submit(sample_event(1)).await.unwrap();
        stage.hasher_handle.flush().await;
        stage.collector_handle.flush().await;
        let event = out_rx.try_recv().unwrap();
        assert!(event.is_hashed());
    }

    #[tokio::test]
    async fn test_counter_bounds_inflight_events() {
        let (out, _out_rx, _out_pending) = Wire::channel(1);
        let stage = spawn(1, 1, Arc::new(Sha256Hasher), 1, out);
        stage.inlet.submit(sample_event(0)).await.unwrap();
        assert_eq!(stage.inlet.counter.in_use(), 1);
    }
}
