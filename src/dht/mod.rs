//! DHT (Distributed Hash Table) module
//!
//! Chord-style ring: identifier space, node arena, membership and lookup.

pub mod node;
pub mod routing;
pub mod network;
pub mod membership;
pub mod lookup;

// Re-exports for convenience
pub use node::{hash_name, owns, Key, Node, NodeId, ID_LEN};
pub use routing::{IndexBucket, IndexEntry, KeyIndex, BUCKET_COUNT};
pub use network::{Network, Route};
pub use membership::{JoinReport, LeaveReport};
