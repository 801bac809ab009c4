//! Transfer module
//!
//! Bulk payload transfer (seed/leech) on top of ring lookups.

pub mod piece;
pub mod seed;

pub use piece::{decode, encode, make_parts, part_key, part_name, split_parts, Part};
pub use seed::SeedManifest;
