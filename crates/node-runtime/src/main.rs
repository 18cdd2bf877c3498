//! # Consensus Event-Intake Pipeline — Node Runtime
//!
//! Entry point: loads configuration, replays whatever PCES segments
//! are already on disk through the hasher before admitting new gossip,
//! then runs until interrupted, flushing every stage in topological
//! order on shutdown.

use std::sync::Arc;

use anyhow::Result;
use ep_sigcheck::{Ed25519Signer, LocalSigner};
use node_runtime::{pipeline, runtime_config::RuntimeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_config = ep_telemetry::TelemetryConfig::from_env();
    let _telemetry_guard = ep_telemetry::init_telemetry(telemetry_config).await?;

    info!("===========================================");
    info!("  Consensus Event-Intake Pipeline");
    info!("===========================================");

    let config = RuntimeConfig::from_env();
    config.validate_for_production();

    let local_signer = LocalSigner::from_seed(config.identity.signing_key_seed);
    let self_public_key = local_signer.public_key();
    let book = config.address_book(self_public_key);

    info!(
        node_id = config.identity.node_id.0,
        peers = config.peers.len(),
        hasher_workers = config.hasher_workers,
        "starting pipeline"
    );

    let pipeline = pipeline::spawn(
        &config,
        book,
        Arc::new(ep_hasher::Sha256Hasher),
        Arc::new(Ed25519Signer),
        Arc::new(local_signer),
    )?;

    info!(segment_directory = %config.pipeline.pces.segment_directory.display(), "replaying durable events before admitting gossip");
    let trigger = ep_pces::replay(
        &config.pipeline.pces.segment_directory,
        &pipeline.gossip_in,
        || pipeline.flush.flush_all(),
        || async {},
    )
    .await?;
    info!(events_replayed = trigger.events_replayed, "replay complete, pipeline is live");

    info!(stages = ?pipeline.stage_names(), "pipeline running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down: flushing every stage in topological order");
    pipeline.flush_and_shutdown().await;

    Ok(())
}
