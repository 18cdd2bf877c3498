//! # Capability Traits
//!
//! `Hasher` and `Signer` are narrow traits so the pipeline never depends
//! on a concrete cryptographic library; adapters in `ep-hasher` and
//! `ep-sigcheck` implement them.

use crate::event::{Hash, PublicKey, Signature};

/// Produces the canonical hash of a byte slice. Implementations are
/// expected to be stateless and cheap to clone across worker threads.
pub trait Hasher: Send + Sync + 'static {
    fn hash(&self, bytes: &[u8]) -> Hash;
}

/// Verifies a signature against a public key. `ep-sigcheck` is the only
/// stage that calls `verify`; `ep-event-creation` calls `sign` when it
/// holds the local node's private key.
pub trait Signer: Send + Sync + 'static {
    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool;

    /// Signs `message` with the local node's key. Returns `None` for a
    /// read-only `Signer` that can only verify (e.g. in a sigcheck-only
    /// adapter that never creates events).
    fn sign(&self, message: &[u8]) -> Option<Signature> {
        let _ = message;
        None
    }
}
