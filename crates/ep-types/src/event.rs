//! # Core Event Types
//!
//! Defines `Event` (the immutable gossip/consensus unit), its parent
//! descriptors, and `LinkedEvent` (an event with resolved in-memory
//! parent references, owned by the linker).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A 32-byte hash identifying an event's canonical encoding.
pub type Hash = [u8; 32];

/// A 64-byte signature over an event's hashed contents.
pub type Signature = [u8; 64];

/// A 32-byte public key identifying an event's creator in the address book.
pub type PublicKey = [u8; 32];

/// Unique identifier for a node (event creator / validator) in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// A reference to a parent event, carried inline on the child so the
/// child is self-describing before the parent is resolved in memory.
///
/// `None` means the creator had no parent of that kind (first event by
/// this creator, i.e. generation 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Hash of the referenced event.
    pub hash: Hash,
    /// Generation of the referenced event.
    pub generation: u64,
    /// Birth round of the referenced event.
    pub birth_round: u64,
    /// Creator of the referenced event.
    pub creator_id: NodeId,
}

/// An immutable gossip event.
///
/// `hash` is `None` until the hasher stage stamps it; every other field
/// is fixed at construction. `generation` and `birth_round` are
/// monotone per creator, `time_created` strictly increases per
/// creator, and `signature` verifies under the creator's public key
/// from the active address book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The node that created this event.
    pub creator_id: NodeId,
    /// Reference to this creator's previous event, if any.
    pub self_parent: Option<EventDescriptor>,
    /// Reference to the other-parent event (from a different creator), if any.
    pub other_parent: Option<EventDescriptor>,
    /// `1 + max(parent.generation)`, or `0` if this event has no parents.
    pub generation: u64,
    /// The latest round in which this event can still influence consensus,
    /// assigned by its creator at creation time.
    pub birth_round: u64,
    /// Wall-clock creation time, monotone per creator, as nanoseconds
    /// since the Unix epoch.
    pub time_created: u64,
    /// Opaque application payloads carried by this event.
    pub transactions: Vec<Vec<u8>>,
    /// Signature over the event's canonical encoding (excluding `hash`).
    pub signature: Signature,
    /// The event's identity, set once by the hasher stage.
    pub hash: Option<Hash>,
}

impl Event {
    /// Computed generation given resolved parent generations:
    /// `generation = 1 + max(parent.generation)`, `0` if there are no parents.
    #[must_use]
    pub fn compute_generation(
        self_parent: Option<&EventDescriptor>,
        other_parent: Option<&EventDescriptor>,
    ) -> u64 {
        let max_parent_gen = self_parent
            .map(|d| d.generation)
            .into_iter()
            .chain(other_parent.map(|d| d.generation))
            .max();
        match max_parent_gen {
            Some(g) => g + 1,
            None => 0,
        }
    }

    /// Returns this event's descriptor, valid only once `hash` is set.
    ///
    /// # Panics
    ///
    /// Panics if called before the hasher stage has stamped the event.
    #[must_use]
    pub fn descriptor(&self) -> EventDescriptor {
        EventDescriptor {
            hash: self.hash.expect("descriptor() called before hashing"),
            generation: self.generation,
            birth_round: self.birth_round,
            creator_id: self.creator_id,
        }
    }

    /// Returns `true` once the hasher stage has stamped this event.
    #[must_use]
    pub fn is_hashed(&self) -> bool {
        self.hash.is_some()
    }

    /// Returns a copy of this event with `hash` stamped. Consumes `self`
    /// because no stage may mutate an event after hashing; this is the
    /// one legal construction of a hashed `Event` from an unhashed one.
    #[must_use]
    pub fn with_hash(mut self, hash: Hash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Canonical bytes hashed by the hasher stage and signed by the
    /// creator. Excludes `hash` and `signature` themselves.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // bincode gives a stable, compact encoding; fields are written
        // in struct-declaration order so this is deterministic across
        // nodes running the same type definition.
        #[derive(Serialize)]
        struct Canonical<'a> {
            creator_id: NodeId,
            self_parent: &'a Option<EventDescriptor>,
            other_parent: &'a Option<EventDescriptor>,
            generation: u64,
            birth_round: u64,
            time_created: u64,
            transactions: &'a Vec<Vec<u8>>,
        }
        bincode::serialize(&Canonical {
            creator_id: self.creator_id,
            self_parent: &self.self_parent,
            other_parent: &self.other_parent,
            generation: self.generation,
            birth_round: self.birth_round,
            time_created: self.time_created,
            transactions: &self.transactions,
        })
        .expect("Event canonical encoding is infallible")
    }
}

/// Builder for constructing well-formed `Event`s (used by the event
/// creation manager and by tests), keeping call sites free of public
/// struct literals.
#[derive(Debug, Default)]
pub struct EventBuilder {
    creator_id: Option<NodeId>,
    self_parent: Option<EventDescriptor>,
    other_parent: Option<EventDescriptor>,
    birth_round: u64,
    time_created: u64,
    transactions: Vec<Vec<u8>>,
    signature: Signature,
}

impl EventBuilder {
    #[must_use]
    pub fn new(creator_id: NodeId) -> Self {
        Self {
            creator_id: Some(creator_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn self_parent(mut self, d: Option<EventDescriptor>) -> Self {
        self.self_parent = d;
        self
    }

    #[must_use]
    pub fn other_parent(mut self, d: Option<EventDescriptor>) -> Self {
        self.other_parent = d;
        self
    }

    #[must_use]
    pub fn birth_round(mut self, r: u64) -> Self {
        self.birth_round = r;
        self
    }

    #[must_use]
    pub fn time_created(mut self, t: u64) -> Self {
        self.time_created = t;
        self
    }

    #[must_use]
    pub fn transactions(mut self, txs: Vec<Vec<u8>>) -> Self {
        self.transactions = txs;
        self
    }

    #[must_use]
    pub fn signature(mut self, sig: Signature) -> Self {
        self.signature = sig;
        self
    }

    /// Builds the event. `generation` is derived from the parent
    /// descriptors, never set directly
    #[must_use]
    pub fn build(self) -> Event {
        let generation = Event::compute_generation(self.self_parent.as_ref(), self.other_parent.as_ref());
        Event {
            creator_id: self.creator_id.expect("creator_id is required"),
            self_parent: self.self_parent,
            other_parent: self.other_parent,
            generation,
            birth_round: self.birth_round,
            time_created: self.time_created,
            transactions: self.transactions,
            signature: self.signature,
            hash: None,
        }
    }
}

/// An event augmented with resolved in-memory references to its parent
/// events, once both are known. Owned exclusively by the in-order
/// linker; non-ancient only.
#[derive(Debug, Clone)]
pub struct LinkedEvent {
    /// The underlying shared, immutable event.
    pub event: Arc<Event>,
    /// Resolved self-parent, if it was non-ancient when linked.
    pub self_parent: Option<Arc<LinkedEvent>>,
    /// Resolved other-parent, if it was non-ancient when linked.
    pub other_parent: Option<Arc<LinkedEvent>>,
    /// Round this event was created in, per the consensus engine.
    pub round_created: u64,
    /// `true` iff this is the first event by its creator in `round_created`.
    pub is_witness: bool,
}

impl LinkedEvent {
    #[must_use]
    pub fn hash(&self) -> Hash {
        self.event.hash.expect("LinkedEvent always wraps a hashed Event")
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.event.generation
    }

    #[must_use]
    pub fn birth_round(&self) -> u64 {
        self.event.birth_round
    }

    #[must_use]
    pub fn creator_id(&self) -> NodeId {
        self.event.creator_id
    }
}
