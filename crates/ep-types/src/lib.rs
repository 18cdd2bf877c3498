//! # Event Pipeline Types
//!
//! Single source of truth for the data model that flows through the
//! consensus event-intake pipeline: `Event`, `EventDescriptor`,
//! `LinkedEvent`, `NonAncientWindow`, `ConsensusRound`, `AddressBook`,
//! pipeline configuration, and the `Signer`/`Hasher` capability traits
//! cryptography is accessed through.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every crate in the workspace depends on
//!   this one for the shapes that cross stage boundaries.
//! - **Immutability after hashing**: `Event` has no public mutators once
//!   constructed; the hasher stage is the only place a hash is attached,
//!   via `Event::with_hash`.
//! - **Capability traits, not concrete crypto**: `Hasher` and `Signer`
//!   are narrow traits so the pipeline never depends on a specific
//!   cryptographic library.

pub mod address_book;
pub mod capability;
pub mod config;
pub mod errors;
pub mod event;
pub mod round;
pub mod window;

pub use address_book::{AddressBook, AddressBookEntry};
pub use capability::{Hasher, Signer};
pub use config::PipelineConfig;
pub use errors::{IntakeError, IntakeResult};
pub use event::{
    Event, EventBuilder, EventDescriptor, Hash, LinkedEvent, NodeId, PublicKey, Signature,
};
pub use round::{ConsensusRound, ConsensusSnapshot, JudgeRecord, RoundTimestamp};
pub use window::{AncientMode, NonAncientWindow};

/// Current wire-format/protocol version for PCES segments and gossip events.
pub const PROTOCOL_VERSION: u16 = 1;
