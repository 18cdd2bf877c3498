//! # Address Book
//!
//! Versioned mapping from node identifier to `{publicKey, weight,
//! active}`. Read by the signature validator and the event
//! creation manager; updated by consensus between rounds only, on a
//! single input serialized with event flow.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{NodeId, PublicKey};

/// One node's entry in the address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub weight: u64,
    pub active: bool,
}

/// The authoritative mapping of node identifiers to public keys and
/// voting weight, at a given round (see GLOSSARY).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressBook {
    effective_round: u64,
    entries: HashMap<NodeId, AddressBookEntry>,
}

impl AddressBook {
    #[must_use]
    pub fn new(effective_round: u64, entries: Vec<AddressBookEntry>) -> Self {
        Self {
            effective_round,
            entries: entries.into_iter().map(|e| (e.node_id, e)).collect(),
        }
    }

    #[must_use]
    pub fn effective_round(&self) -> u64 {
        self.effective_round
    }

    #[must_use]
    pub fn entry(&self, node_id: NodeId) -> Option<&AddressBookEntry> {
        self.entries.get(&node_id)
    }

    #[must_use]
    pub fn public_key(&self, node_id: NodeId) -> Option<PublicKey> {
        self.entry(node_id).filter(|e| e.active).map(|e| e.public_key)
    }

    /// Total voting weight across active nodes — the denominator for
    /// strongly-seeing and fame-election supermajority checks.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.entries.values().filter(|e| e.active).map(|e| e.weight).sum()
    }

    #[must_use]
    pub fn weight_of(&self, node_id: NodeId) -> u64 {
        self.entry(node_id).filter(|e| e.active).map(|e| e.weight).unwrap_or(0)
    }

    /// `true` iff `weight` meets or exceeds 2/3 of total active weight.
    #[must_use]
    pub fn is_supermajority(&self, weight: u64) -> bool {
        // Integer-safe form of `weight >= (2/3) * total_weight`.
        weight.saturating_mul(3) >= self.total_weight().saturating_mul(2)
    }

    #[must_use]
    pub fn active_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.entries.values().filter(|e| e.active).map(|e| e.node_id).collect();
        ids.sort();
        ids
    }
}
