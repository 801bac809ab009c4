//! chord-ring-sim
//!
//! A Chord-style consistent hashing ring with join/leave data handoff,
//! ring-walk routing and chunked payload seeding.

pub mod dht;
pub mod storage;
pub mod transfer;
pub mod cli;
pub mod error;

pub use error::{Result, RingError};

pub use dht::{
    hash_name, owns, IndexEntry, JoinReport, Key, KeyIndex, LeaveReport, Network, Node, NodeId, Route,
};
pub use storage::{FileBackend, Location, MemoryBackend, StorageBackend, StorageType};
pub use transfer::{Part, SeedManifest};
pub use cli::{CliArgs, Config, ReportDisplay, ScenarioFile, ScenarioStats};
