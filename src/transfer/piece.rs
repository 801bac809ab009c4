//! Piece module
//!
//! Text-safe encoding of payloads and their split into named parts.

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::dht::node::{hash_name, Key};
use crate::error::{Result, RingError};

/// Encode a payload into its text-safe form
pub fn encode(content: &[u8]) -> String {
    hex::encode(content)
}

/// Decode the text-safe form back into bytes
pub fn decode(text: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(text)?)
}

/// Length of every part but the last for a payload of `len` bytes
pub fn part_size(len: usize, part_count: usize) -> usize {
    if part_count == 0 {
        return 0;
    }
    (len + part_count - 1) / part_count
}

/// Split `text` into exactly `part_count` contiguous chunks.
///
/// Every chunk but the last has `part_size` bytes; trailing chunks are
/// shorter or empty when the text runs out.
pub fn split_parts(text: &str, part_count: usize) -> Result<Vec<&str>> {
    if part_count == 0 {
        return Err(RingError::validation_error_with_field("Part count must be at least 1", "part_count"));
    }
    if !text.is_ascii() {
        return Err(RingError::validation_error("Encoded payload is not ASCII"));
    }

    let size = part_size(text.len(), part_count);
    let parts = (0..part_count)
        .map(|i| {
            let start = (i * size).min(text.len());
            let end = ((i + 1) * size).min(text.len());
            &text[start..end]
        })
        .collect();
    Ok(parts)
}

/// Logical name of part `index` of `base_name`
pub fn part_name(base_name: &str, index: usize) -> String {
    format!("{}_{}", base_name, index)
}

/// Ring key of part `index` of `base_name`
pub fn part_key(base_name: &str, index: usize) -> Key {
    hash_name(&part_name(base_name, index))
}

/// SHA-1 digest of a part
pub fn digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// One part of a seeded payload
#[derive(Debug, Clone)]
pub struct Part {
    /// Position in the payload
    pub index: usize,
    /// Logical name (`{base}_{index}`)
    pub name: String,
    /// Ring key derived from the name
    pub key: Key,
    /// Encoded chunk
    pub data: Bytes,
    /// SHA-1 of `data`
    pub hash: [u8; 20],
}

impl Part {
    /// Create a part from its encoded chunk
    pub fn new(base_name: &str, index: usize, data: Bytes) -> Self {
        Self {
            index,
            name: part_name(base_name, index),
            key: part_key(base_name, index),
            hash: digest(&data),
            data,
        }
    }

    /// Check the part's data against an expected digest
    pub fn verify(&self, expected: &[u8; 20]) -> bool {
        &self.hash == expected
    }
}

/// Encode `content` and cut it into `part_count` parts
pub fn make_parts(content: &[u8], base_name: &str, part_count: usize) -> Result<Vec<Part>> {
    let text = encode(content);
    let chunks = split_parts(&text, part_count)?;
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Part::new(base_name, i, Bytes::copy_from_slice(chunk.as_bytes())))
        .collect())
}
