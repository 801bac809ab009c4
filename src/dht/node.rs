//! Ring node module
//!
//! Identifier space and the per-node record kept in the network arena.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::dht::routing::KeyIndex;

/// Width of the identifier space in bytes (256 bits)
pub const ID_LEN: usize = 32;

/// Ring identifier (256 bits, big-endian)
///
/// Byte-wise ordering of the big-endian representation is the numeric
/// ordering of the underlying unsigned integer, so `Ord` compares ids the
/// way the ring sorts them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; ID_LEN]);

/// Keys live in the same identifier space as nodes
pub type Key = NodeId;

/// Hash an arbitrary name into the identifier space (SHA-256)
pub fn hash_name(name: &str) -> NodeId {
    let digest = Sha256::digest(name.as_bytes());
    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(&digest);
    NodeId(id)
}

impl NodeId {
    /// Smallest identifier
    pub const MIN: NodeId = NodeId([0u8; ID_LEN]);
    /// Largest identifier
    pub const MAX: NodeId = NodeId([0xFFu8; ID_LEN]);

    /// Create a new NodeId from bytes
    pub fn new(id: [u8; ID_LEN]) -> Self {
        Self(id)
    }

    /// Identifier whose value is `value` (fits in the low 16 bytes)
    pub fn from_u128(value: u128) -> Self {
        let mut id = [0u8; ID_LEN];
        id[ID_LEN - 16..].copy_from_slice(&value.to_be_bytes());
        Self(id)
    }

    /// Index bucket for this id (`id mod 256`)
    pub fn bucket(&self) -> u8 {
        self.0[ID_LEN - 1]
    }

    /// Get the NodeId as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex digits, for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A member of the network
///
/// Neighbours are stored by identifier rather than by reference; the
/// [`Network`](crate::dht::Network) arena resolves them.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique name (stands in for an address)
    pub name: String,
    /// Identifier derived from `name`
    pub id: NodeId,
    /// Counter-clockwise neighbour
    pub predecessor: NodeId,
    /// Clockwise neighbour
    pub successor: NodeId,
    /// Owns the wraparound segment of its ring
    pub is_anchor: bool,
    /// Records this node currently owns
    pub index: KeyIndex,
}

impl Node {
    /// Create a standalone node: self-loop, anchor of one, empty index
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = hash_name(&name);
        Self::with_id(name, id)
    }

    /// Create a standalone node with an explicit identifier
    pub fn with_id(name: impl Into<String>, id: NodeId) -> Self {
        Self {
            name: name.into(),
            id,
            predecessor: id,
            successor: id,
            is_anchor: true,
            index: KeyIndex::new(),
        }
    }

    /// Whether this node is linked to any other node
    pub fn is_joined(&self) -> bool {
        self.successor != self.id || self.predecessor != self.id
    }

    /// Storage namespace holding this node's blobs
    pub fn namespace(&self) -> &str {
        &self.name
    }

    /// Reset to the standalone state
    pub(crate) fn reset(&mut self) {
        self.predecessor = self.id;
        self.successor = self.id;
        self.is_anchor = true;
        self.index = KeyIndex::new();
    }
}

/// Ownership rule for a node with identifier `id` whose predecessor is `pred`.
///
/// A node owns `(pred, id]`; the anchor also owns everything above its
/// predecessor and everything at or below itself. A standalone node owns
/// the whole space.
pub fn owns(key: &Key, id: &NodeId, pred: &NodeId, is_anchor: bool) -> bool {
    if pred == id {
        return true;
    }
    if pred < key && key <= id {
        return true;
    }
    is_anchor && (key > pred || key <= id)
}
