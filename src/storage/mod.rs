//! Storage module
//!
//! Blob storage backends used by ring nodes.

pub mod backend;
pub mod file;
pub mod memory;

// Re-export backend types
pub use backend::{Location, StorageBackend, StorageType};

// Re-export implementations
pub use file::FileBackend;
pub use memory::MemoryBackend;
