//! # Pipeline Wiring
//!
//! Assembles the fourteen stages of the consensus event-intake
//! pipeline into one running graph. Stages are constructed
//! leaf-to-root: a stage's `out` wire must already exist before the
//! stage that feeds it is spawned, so this function builds the
//! consensus engine first and the hasher/gossip entrypoint last.
//!
//! `ep-bus` has no built-in fan-out primitive (a wire solders one
//! producer to one consumer); the orphan buffer's single output must
//! reach four destinations, so this module runs its own tiny
//! fan-out stage over a plain [`ep_bus::spawn_sequential`] handler,
//! the same pattern every other stage in this pipeline is built from.

use std::sync::Arc;

use ep_bus::{FlushCoordinator, InjectWire, StageHandle, Wire};
use ep_types::{AddressBook, ConsensusRound, Event, PipelineConfig};
use tracing::info;

use crate::runtime_config::RuntimeConfig;

/// Everything `main` needs once the pipeline is running: the public
/// ingress point (gossip gets admitted here, after replay), the
/// address-book update inlet consensus uses to rotate the book, the
/// shadowgraph query handle for the gossip layer, and the precomputed
/// flush/shutdown plan.
pub struct Pipeline {
    pub gossip_in: ep_hasher::HasherInlet,
    pub address_book_updates: Wire<AddressBook>,
    pub shadowgraph: ep_shadowgraph::ShadowgraphHandle,
    pub window: ep_bus::WindowReader,
    pub flush: FlushCoordinator,
}

impl Pipeline {
    /// Flushes every stage in topological order, then tears down all
    /// worker tasks. Matches `platformCoordinator.flushIntakePipeline`
    /// followed by shutdown.
    pub async fn flush_and_shutdown(&self) {
        self.flush.flush_all().await;
        self.flush.shutdown_all();
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.flush.stage_names()
    }
}

/// A minimal stage that drains a wire and logs what arrived, standing
/// in for an external collaborator this repository does not implement
/// (its "external collaborators, interfaces only"): the
/// application state machine, pre-handle, and signature collector.
fn spawn_sink<T, F>(name: &'static str, queue_capacity: usize, log: F) -> (Wire<T>, StageHandle)
where
    T: Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let (inlet, rx, pending) = Wire::channel(queue_capacity);
    let handle = ep_bus::spawn_sequential(name, rx, pending, move |item: T| {
        log(&item);
        async {}
    });
    (inlet, handle)
}

/// Builds and starts the full pipeline. `self_public_key` is this
/// node's own verifying key, already derived from
/// `config.identity.signing_key_seed` by the caller (so this function
/// never needs the raw seed, only the capability objects built from it).
pub fn spawn(
    config: &RuntimeConfig,
    book: AddressBook,
    hasher: Arc<dyn ep_types::Hasher>,
    verify_signer: Arc<dyn ep_types::Signer>,
    local_signer: Arc<dyn ep_types::Signer>,
) -> std::io::Result<Pipeline> {
    let PipelineConfig { wiring, orphan_buffer, future_event_buffer, consensus, pces, ancient_mode } = config.pipeline.clone();
    let queue_capacity = wiring.default_queue_capacity;
    let self_id = config.identity.node_id;

    // --- consensus, the root of the graph: owns the non-ancient window ---
    let (application_in, application_handle) = spawn_sink::<ConsensusRound, _>("application_sink", queue_capacity, |round| {
        info!(round = round.round_number, events = round.len(), "consensus round produced");
    });
    let (consensus_in, consensus_handle, window) = ep_consensus::spawn(book.clone(), consensus, ancient_mode, queue_capacity, application_in);

    // --- shadowgraph, fed by the linker, queried by event creation ---
    let shadowgraph_config = ep_shadowgraph::ShadowgraphConfig { input_queue_capacity: queue_capacity };
    let (shadowgraph_in, shadowgraph_handle, shadowgraph_query) = ep_shadowgraph::spawn(window.clone(), shadowgraph_config);

    // --- in-order linker ---
    let (linker_in, linker_handle) = ep_linker::spawn(window.clone(), queue_capacity, shadowgraph_in, consensus_in);

    // --- PCES sequencer + writer ---
    let (pces_in, sequencer_handle, writer_stage) =
        ep_pces::spawn_sequencer_and_writer(&pces, ancient_mode, queue_capacity, queue_capacity, linker_in)?;

    // --- external collaborators the orphan buffer's output also reaches ---
    let (app_prehandle_in, app_prehandle_handle) = spawn_sink::<Event, _>("app_prehandle_sink", queue_capacity, |_| {});
    let (signature_collector_in, signature_collector_handle) = spawn_sink::<Event, _>("signature_collector_sink", queue_capacity, |_| {});

    // --- orphan buffer's raw output, fanned out once its four
    // destinations all exist ---
    let (fanout_in, fanout_rx, fanout_pending) = Wire::channel(queue_capacity);

    let orphan_buffer_config = ep_orphan_buffer::OrphanBufferConfig { known_recent_capacity: orphan_buffer.capacity };
    let (orphan_buffer_in, orphan_buffer_handle) = ep_orphan_buffer::spawn(window.clone(), orphan_buffer_config, queue_capacity, fanout_in);

    let (sigcheck_inlets, sigcheck_handle) = ep_sigcheck::spawn(verify_signer, book.clone(), queue_capacity, orphan_buffer_in);
    let (dedup_in, dedup_handle) = ep_dedup::spawn(window.clone(), queue_capacity, sigcheck_inlets.events);

    let validator_config = ep_validator::ValidatorConfig::default();
    let (validator_in, validator_handle) = ep_validator::spawn(window.clone(), validator_config, queue_capacity, dedup_in);

    // --- the single cyclic edge: event creation re-injects into the
    // validator without respecting its backpressure at the injection
    // point, but the bridge task below still blocks on the validator's
    // ordinary bounded queue, so backpressure still applies downstream
    // of the inject point itself ---
    let (to_validator, mut validator_inject_rx) = InjectWire::channel();
    let bridge_target = validator_in.clone();
    tokio::spawn(async move {
        while let Some(event) = validator_inject_rx.recv().await {
            if bridge_target.solder_to(event).await.is_err() {
                break;
            }
        }
    });

    let hasher_stage = ep_hasher::spawn(config.hasher_workers, wiring.event_hasher_unhandled_capacity, hasher, queue_capacity, validator_in);

    // --- event creation manager and future event buffer ---
    let event_creation_config = ep_event_creation::EventCreationConfig::default();
    let (event_creation_in, event_creation_handle) = ep_event_creation::spawn(
        self_id,
        book,
        Arc::new(ep_hasher::Sha256Hasher),
        local_signer,
        window.clone(),
        shadowgraph_query.clone(),
        event_creation_config,
        to_validator,
    );

    let future_buffer_config = ep_future_buffer::FutureBufferConfig { input_queue_capacity: queue_capacity };
    let _ = future_event_buffer; // capacity knob folded into `future_buffer_config` above; kept for config-shape parity with 
    let (future_buffer_in, future_buffer_handle) = ep_future_buffer::spawn(window.clone(), future_buffer_config, event_creation_in);

    // --- the orphan buffer's fan-out itself, now that every destination exists ---
    let destinations = vec![pces_in, future_buffer_in, app_prehandle_in, signature_collector_in];
    let fanout_handle = ep_bus::spawn_sequential("orphan_fanout", fanout_rx, fanout_pending, move |event: Event| {
        let destinations = destinations.clone();
        async move {
            for destination in &destinations {
                let _ = destination.solder_to(event.clone()).await;
            }
        }
    });

    // event_creation's output re-enters validator through `to_validator`,
    // so this graph has no true topological order; flushing validator
    // before event_creation just means a self-created event in flight at
    // shutdown may not be waited on, which shutdown_all() cuts short
    // anyway.
    let flush = FlushCoordinator::new(vec![
        hasher_stage.hasher_handle,
        hasher_stage.collector_handle,
        validator_handle,
        dedup_handle,
        sigcheck_handle,
        orphan_buffer_handle,
        fanout_handle,
        sequencer_handle,
        writer_stage.handle,
        linker_handle,
        shadowgraph_handle,
        consensus_handle,
        application_handle,
        app_prehandle_handle,
        signature_collector_handle,
        event_creation_handle,
        future_buffer_handle,
    ]);

    Ok(Pipeline {
        gossip_in: hasher_stage.inlet,
        address_book_updates: sigcheck_inlets.address_book_updates,
        shadowgraph: shadowgraph_query,
        window,
        flush,
    })
}
