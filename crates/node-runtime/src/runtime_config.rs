//! # Runtime Configuration
//!
//! Node identity, peer address-book, and pipeline sizing, loaded from
//! the environment the same way [`ep_telemetry::TelemetryConfig`] is.
//!
//! ## Security Requirements
//!
//! - `identity.signing_key_seed` MUST NOT be the default all-zero value
//!   in production.

use std::env;

use ep_types::{AddressBook, AddressBookEntry, NodeId, PipelineConfig, PublicKey};

/// This node's own identity: which `NodeId` it creates events as, and
/// the seed for its ed25519 signing key.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub node_id: NodeId,
    pub signing_key_seed: [u8; 32],
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { node_id: NodeId(1), signing_key_seed: [0u8; 32] }
    }
}

impl IdentityConfig {
    fn from_env() -> Self {
        let node_id = env::var("EP_NODE_ID").ok().and_then(|v| v.parse().ok()).map(NodeId).unwrap_or(NodeId(1));
        let signing_key_seed = env::var("EP_SIGNING_KEY_SEED").ok().and_then(|hex_seed| decode_seed(&hex_seed)).unwrap_or([0u8; 32]);
        Self { node_id, signing_key_seed }
    }
}

fn decode_seed(hex_seed: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_seed.trim()).ok()?;
    bytes.try_into().ok()
}

/// One other node's entry, read from `EP_PEERS` as
/// `node_id:hex_public_key:weight` tuples separated by `,`.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub weight: u64,
}

fn parse_peers(raw: &str) -> Vec<PeerConfig> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let mut fields = entry.trim().split(':');
            let node_id = fields.next()?.parse().ok().map(NodeId)?;
            let public_key: PublicKey = hex::decode(fields.next()?).ok()?.try_into().ok()?;
            let weight = fields.next()?.parse().ok()?;
            Some(PeerConfig { node_id, public_key, weight })
        })
        .collect()
}

/// Complete node configuration: identity, known peers, and pipeline
/// sizing.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub identity: IdentityConfig,
    pub peers: Vec<PeerConfig>,
    pub pipeline: PipelineConfig,
    pub hasher_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            peers: Vec::new(),
            pipeline: PipelineConfig::default(),
            hasher_workers: num_cpus(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4)
}

impl RuntimeConfig {
    /// Loads configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `EP_NODE_ID`: this node's identifier (default: 1)
    /// - `EP_SIGNING_KEY_SEED`: hex-encoded 32-byte ed25519 seed
    /// - `EP_PEERS`: `id:hex_pubkey:weight` tuples separated by `,`
    /// - `EP_PCES_DIR`: PCES segment directory (default: `./pces`)
    /// - `EP_HASHER_WORKERS`: hasher worker-pool size
    #[must_use]
    pub fn from_env() -> Self {
        let mut pipeline = PipelineConfig::default();
        if let Ok(dir) = env::var("EP_PCES_DIR") {
            pipeline.pces.segment_directory = dir.into();
        }

        Self {
            identity: IdentityConfig::from_env(),
            peers: env::var("EP_PEERS").map(|raw| parse_peers(&raw)).unwrap_or_default(),
            pipeline,
            hasher_workers: env::var("EP_HASHER_WORKERS").ok().and_then(|v| v.parse().ok()).unwrap_or_else(num_cpus),
        }
    }

    /// The address book this node starts with: itself plus every
    /// configured peer. Consensus may supersede this with a newer book
    /// as rounds are produced; discovering peers dynamically
    /// is out of scope here (external collaborator).
    #[must_use]
    pub fn address_book(&self, self_public_key: PublicKey) -> AddressBook {
        let mut entries = vec![AddressBookEntry { node_id: self.identity.node_id, public_key: self_public_key, weight: 1, active: true }];
        entries.extend(self.peers.iter().map(|p| AddressBookEntry { node_id: p.node_id, public_key: p.public_key, weight: p.weight, active: true }));
        AddressBook::new(0, entries)
    }

    /// Panics if the signing key seed is still the default all-zero
    /// value.
    ///
    /// # Panics
    ///
    /// Panics if `identity.signing_key_seed` is `[0u8; 32]`.
    pub fn validate_for_production(&self) {
        if self.identity.signing_key_seed == [0u8; 32] {
            panic!("SECURITY VIOLATION: signing key seed is default zero value. Set EP_SIGNING_KEY_SEED or provide one in config.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_is_node_one() {
        let config = RuntimeConfig::default();
        assert_eq!(config.identity.node_id, NodeId(1));
    }

    #[test]
    #[should_panic(expected = "signing key seed is default zero value")]
    fn test_validate_rejects_default_seed() {
        RuntimeConfig::default().validate_for_production();
    }

    #[test]
    fn test_validate_accepts_nonzero_seed() {
        let mut config = RuntimeConfig::default();
        config.identity.signing_key_seed = [7u8; 32];
        config.validate_for_production();
    }

    #[test]
    fn test_parse_peers_rejects_wrong_length_key() {
        let peers = parse_peers("2:aabb:3");
        assert_eq!(peers.len(), 0, "a 2-byte key must fail to decode into a 32-byte public key");
    }

    #[test]
    fn test_parse_peers_reads_valid_tuple() {
        let hex_key = "01".repeat(32);
        let peers = parse_peers(&format!("2:{hex_key}:3"));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_id, NodeId(2));
        assert_eq!(peers[0].weight, 3);
    }

    #[test]
    fn test_address_book_includes_self_and_peers() {
        let mut config = RuntimeConfig::default();
        let hex_key = "02".repeat(32);
        config.peers = parse_peers(&format!("2:{hex_key}:5"));
        let book = config.address_book([1u8; 32]);
        assert_eq!(book.total_weight(), 1 + 5);
    }
}
