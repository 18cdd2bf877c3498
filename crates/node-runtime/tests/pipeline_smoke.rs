//! End-to-end smoke test: wires up the full pipeline against a
//! temporary PCES directory, submits one validly signed gossip event,
//! and verifies the pipeline flushes and shuts down cleanly.

use std::sync::Arc;
use std::time::Duration;

use ep_sigcheck::{Ed25519Signer, LocalSigner};
use ep_types::{EventBuilder, NodeId, Signer};
use node_runtime::{pipeline, runtime_config::RuntimeConfig};

#[tokio::test]
async fn test_pipeline_accepts_and_flushes_a_signed_event() {
    let segment_dir = tempfile::tempdir().expect("tempdir");

    let mut config = RuntimeConfig::default();
    config.identity.signing_key_seed = [42u8; 32];
    config.pipeline.pces.segment_directory = segment_dir.path().to_path_buf();

    let local_signer = LocalSigner::from_seed(config.identity.signing_key_seed);
    let self_public_key = local_signer.public_key();
    let book = config.address_book(self_public_key);

    let pipeline = pipeline::spawn(
        &config,
        book,
        Arc::new(ep_hasher::Sha256Hasher),
        Arc::new(Ed25519Signer),
        Arc::new(local_signer.clone()),
    )
    .expect("pipeline spawns");

    let mut event = EventBuilder::new(config.identity.node_id).time_created(1).transactions(vec![b"hello".to_vec()]).build();
    let message = event.canonical_bytes();
    let signature = local_signer.sign(&message).expect("local signer can sign");
    event.signature = signature;

    pipeline.gossip_in.submit(event).await.expect("event admitted");

    tokio::time::timeout(Duration::from_secs(10), pipeline.flush_and_shutdown())
        .await
        .expect("pipeline flushes without hanging");
}

#[tokio::test]
async fn test_pipeline_stage_names_cover_every_stage() {
    let segment_dir = tempfile::tempdir().expect("tempdir");
    let mut config = RuntimeConfig::default();
    config.identity.signing_key_seed = [7u8; 32];
    config.pipeline.pces.segment_directory = segment_dir.path().to_path_buf();

    let local_signer = LocalSigner::from_seed(config.identity.signing_key_seed);
    let book = config.address_book(local_signer.public_key());

    let pipeline = pipeline::spawn(&config, book, Arc::new(ep_hasher::Sha256Hasher), Arc::new(Ed25519Signer), Arc::new(local_signer))
        .expect("pipeline spawns");

    let names = pipeline.stage_names();
    assert!(names.contains(&"signature_validator"));
    assert!(names.contains(&"post_hash_collector"));
    assert!(names.contains(&"orphan_fanout"));

    pipeline.flush_and_shutdown().await;
}
