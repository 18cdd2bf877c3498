//! # Signature Validator
//!
//! Sequential stage verifying an event's signature against the address
//! book entry for its claimed creator. Address-book updates arrive on a
//! dedicated input wire; upstream is responsible for ordering an update
//! ahead of the first event signed under the new epoch. Tested by
//! [`spawn`]'s usage contract: both inputs feed the same sequential
//! worker, so a book update enqueued before an event is guaranteed to
//! apply before that event is checked.

use std::sync::Arc;

use ed25519_dalek::{Signature as DalekSignature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use ep_bus::{StageHandle, Wire};
use ep_types::{AddressBook, Event, Signer};
use parking_lot::RwLock;
use tracing::warn;

/// An `ed25519-dalek`-backed `Signer` adapter, verify-only. Used by the
/// signature validator, which never creates events and so never needs
/// to sign.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Signer;

impl Signer for Ed25519Signer {
    fn verify(&self, public_key: &ep_types::PublicKey, message: &[u8], signature: &ep_types::Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(signature);
        verifying_key.verify(message, &sig).is_ok()
    }
}

/// An `ed25519-dalek`-backed `Signer` adapter that also holds the local
/// node's private key, for the event creation manager. Every other
/// stage only verifies, so this is kept separate from [`Ed25519Signer`]
/// rather than giving every adapter a key it doesn't need.
#[derive(Clone)]
pub struct LocalSigner {
    signing_key: Arc<SigningKey>,
}

impl LocalSigner {
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { signing_key: Arc::new(SigningKey::from_bytes(&seed)) }
    }

    #[must_use]
    pub fn public_key(&self) -> ep_types::PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl Signer for LocalSigner {
    fn verify(&self, public_key: &ep_types::PublicKey, message: &[u8], signature: &ep_types::Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(signature);
        verifying_key.verify(message, &sig).is_ok()
    }

    fn sign(&self, message: &[u8]) -> Option<ep_types::Signature> {
        Some(self.signing_key.sign(message).to_bytes())
    }
}

/// Two inputs feeding one sequential worker, matching its
/// ordering requirement without needing an explicit epoch barrier: an
/// address-book update enqueued before an event is processed before
/// that event because both share the same FIFO queue.
enum Inbound {
    Event(Event),
    AddressBookUpdate(AddressBook),
}

/// The two input wires exposed to callers: one for gossip/pipeline
/// events, one for address-book updates from consensus.
pub struct SigCheckInlets {
    pub events: Wire<Event>,
    pub address_book_updates: Wire<AddressBook>,
}

/// Spawns the signature validator. Valid events are soldered onto
/// `out`; events with an unknown/inactive creator or a signature that
/// fails to verify are dropped and counted.
pub fn spawn(signer: Arc<dyn Signer>, initial_book: AddressBook, input_queue_capacity: usize, out: Wire<Event>) -> (SigCheckInlets, StageHandle) {
    let (events_tx, mut events_rx, _events_pending) = Wire::channel(input_queue_capacity);
    let (updates_tx, mut updates_rx, _updates_pending) = Wire::channel(input_queue_capacity);

    // Both inlets share one logical queue: a merge task interleaves
    // them, respecting arrival order across the two wires so an
    // address-book update soldered before an event is seen first.
    let (merged_tx, merged_rx, merged_pending) = Wire::channel(input_queue_capacity * 2);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                Some(update) = updates_rx.recv() => {
                    let _ = merged_tx.solder_to(Inbound::AddressBookUpdate(update)).await;
                }
                Some(event) = events_rx.recv() => {
                    let _ = merged_tx.solder_to(Inbound::Event(event)).await;
                }
                else => break,
            }
        }
    });

    let book = Arc::new(RwLock::new(initial_book));
    let handle = ep_bus::spawn_sequential("signature_validator", merged_rx, merged_pending, move |item: Inbound| {
        let out = out.clone();
        let signer = signer.clone();
        let book = book.clone();
        async move {
            match item {
                Inbound::AddressBookUpdate(update) => {
                    *book.write() = update;
                }
                Inbound::Event(event) => {
                    let Some(public_key) = book.read().public_key(event.creator_id) else {
                        warn!(creator = ?event.creator_id, "signature validator: unknown or inactive creator");
                        ep_telemetry::SIGNATURE_VERIFICATIONS.with_label_values(&["unknown_creator"]).inc();
                        return;
                    };
                    let message = event.canonical_bytes();
                    if signer.verify(&public_key, &message, &event.signature) {
                        ep_telemetry::SIGNATURE_VERIFICATIONS.with_label_values(&["valid"]).inc();
                        let _ = out.solder_to(event).await;
                    } else {
                        warn!(creator = ?event.creator_id, "signature verification failed");
                        ep_telemetry::SIGNATURE_VERIFICATIONS.with_label_values(&["invalid"]).inc();
                    }
                }
            }
        }
    });

    (SigCheckInlets { events: events_tx, address_book_updates: updates_tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{SigningKey};
    use ep_types::{AddressBookEntry, EventBuilder, NodeId};
    use rand::rngs::OsRng;

    fn book_with_key(node: NodeId, verifying: VerifyingKey) -> AddressBook {
        AddressBook::new(0, vec![AddressBookEntry { node_id: node, public_key: verifying.to_bytes(), weight: 1, active: true }])
    }

    #[tokio::test]
    async fn test_valid_signature_passes() {
        let mut csprng = OsRng;
        let signing = SigningKey::generate(&mut csprng);
        let verifying = signing.verifying_key();

        let mut event = EventBuilder::new(NodeId(1)).time_created(1).build().with_hash([9u8; 32]);
        let message = event.canonical_bytes();
        let sig = ed25519_dalek::Signer::sign(&signing, &message);
        event.signature = sig.to_bytes();

        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlets, handle) = spawn(Arc::new(Ed25519Signer), book_with_key(NodeId(1), verifying), 4, out);
        inlets.events.solder_to(event).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_signature_dropped() {
        let mut csprng = OsRng;
        let signing = SigningKey::generate(&mut csprng);
        let verifying = signing.verifying_key();

        let event = EventBuilder::new(NodeId(1)).time_created(1).build().with_hash([9u8; 32]);
        // signature left as all-zero default, which will not verify.

        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlets, handle) = spawn(Arc::new(Ed25519Signer), book_with_key(NodeId(1), verifying), 4, out);
        inlets.events.solder_to(event).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_creator_dropped() {
        let event = EventBuilder::new(NodeId(99)).time_created(1).build().with_hash([9u8; 32]);
        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlets, handle) = spawn(Arc::new(Ed25519Signer), AddressBook::default(), 4, out);
        inlets.events.solder_to(event).await.unwrap();
        handle.flush().await;
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_address_book_update_applies_before_next_event() {
        let mut csprng = OsRng;
        let signing = SigningKey::generate(&mut csprng);
        let verifying = signing.verifying_key();

        let (out, mut out_rx, _p) = Wire::channel(4);
        let (inlets, handle) = spawn(Arc::new(Ed25519Signer), AddressBook::default(), 4, out);

        inlets.address_book_updates.solder_to(book_with_key(NodeId(1), verifying)).await.unwrap();

        let mut event = EventBuilder::new(NodeId(1)).time_created(1).build().with_hash([9u8; 32]);
        let message = event.canonical_bytes();
        let sig = ed25519_dalek::Signer::sign(&signing, &message);
        event.signature = sig.to_bytes();
        inlets.events.solder_to(event).await.unwrap();

        handle.flush().await;
        assert!(out_rx.try_recv().is_ok());
    }

    #[test]
    fn test_local_signer_round_trips_its_own_signature() {
        let signer = LocalSigner::from_seed([5u8; 32]);
        let message = b"an event's canonical bytes";
        let signature = signer.sign(message).expect("local signer must be able to sign");
        assert!(signer.verify(&signer.public_key(), message, &signature));
    }
}
