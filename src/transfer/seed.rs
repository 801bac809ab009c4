//! Seed module
//!
//! Chunked store (seed) and reassembling fetch (leech) of payloads.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::dht::network::Network;
use crate::error::{Result, RingError};
use crate::transfer::piece::{decode, make_parts, part_key, part_name, Part};

/// What a seeder hands out so leechers can verify what they fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedManifest {
    /// Base name the part names derive from
    pub base_name: String,
    /// Number of parts stored
    pub part_count: usize,
    /// Length of the encoded payload
    pub encoded_len: usize,
    /// SHA-1 of every part, hex encoded
    pub part_digests: Vec<String>,
}

impl SeedManifest {
    /// Serialize to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Save to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = self.serialize()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    /// Load from file
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path).await?;
        Ok(Some(Self::deserialize(&data)?))
    }
}

impl Network {
    /// Encode `content`, split it into `part_count` parts and store each
    /// part under the hash of `{base_name}_{i}`, starting at `start`.
    pub async fn seed(&mut self, start: &str, content: &[u8], base_name: &str, part_count: usize) -> Result<SeedManifest> {
        let parts = make_parts(content, base_name, part_count)?;
        let encoded_len = parts.iter().map(|p| p.data.len()).sum();

        info!("Seeding {} ({} bytes) as {} parts", base_name, content.len(), part_count);

        let mut part_digests = Vec::with_capacity(parts.len());
        for part in parts {
            let location = self
                .store(start, part.key, part.data.clone(), &part.name)
                .await
                .map_err(|e| e.with_context(format!("while seeding part {}", part.name)))?;
            debug!("Part {} ({} bytes) stored at {}", part.name, part.data.len(), location);
            part_digests.push(hex::encode(part.hash));
        }

        Ok(SeedManifest {
            base_name: base_name.to_string(),
            part_count,
            encoded_len,
            part_digests,
        })
    }

    /// Fetch parts `0..part_count` of `base_name` and decode the payload
    pub async fn leech(&self, start: &str, base_name: &str, part_count: usize) -> Result<Vec<u8>> {
        let parts = self.fetch_parts(start, base_name, part_count).await?;
        Self::reassemble(&parts)
    }

    /// Like [`Network::leech`], checking every part against the manifest
    pub async fn leech_verified(&self, start: &str, manifest: &SeedManifest) -> Result<Vec<u8>> {
        if manifest.part_digests.len() != manifest.part_count {
            return Err(RingError::validation_error_with_field(
                format!(
                    "Manifest lists {} digests for {} parts",
                    manifest.part_digests.len(),
                    manifest.part_count
                ),
                "part_digests",
            ));
        }

        let parts = self.fetch_parts(start, &manifest.base_name, manifest.part_count).await?;
        for (part, expected) in parts.iter().zip(&manifest.part_digests) {
            let expected = parse_digest(expected)?;
            if !part.verify(&expected) {
                return Err(RingError::validation_error_with_field(
                    format!("Part {} failed verification", part.name),
                    "part_digests",
                ));
            }
        }

        let total: usize = parts.iter().map(|p| p.data.len()).sum();
        if total != manifest.encoded_len {
            return Err(RingError::validation_error_with_field(
                format!("Reassembled {} bytes, manifest expects {}", total, manifest.encoded_len),
                "encoded_len",
            ));
        }

        Self::reassemble(&parts)
    }

    async fn fetch_parts(&self, start: &str, base_name: &str, part_count: usize) -> Result<Vec<Part>> {
        if part_count == 0 {
            return Err(RingError::validation_error_with_field("Part count must be at least 1", "part_count"));
        }

        let mut parts = Vec::with_capacity(part_count);
        for i in 0..part_count {
            let data = self
                .fetch_value(start, &part_key(base_name, i))
                .await
                .map_err(|e| e.with_context(format!("while leeching part {}", part_name(base_name, i))))?;
            parts.push(Part::new(base_name, i, data));
        }
        debug!("Fetched {} parts of {}", part_count, base_name);
        Ok(parts)
    }

    fn reassemble(parts: &[Part]) -> Result<Vec<u8>> {
        let mut text = String::with_capacity(parts.iter().map(|p| p.data.len()).sum());
        for part in parts {
            let chunk = std::str::from_utf8(&part.data)
                .map_err(|e| RingError::validation_error(format!("Part {} is not text: {}", part.name, e)))?;
            text.push_str(chunk);
        }
        decode(&text)
    }
}

/// Parse a hex SHA-1 digest from a manifest
fn parse_digest(hex_digest: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(hex_digest)?;
    bytes.try_into().map_err(|_| {
        RingError::validation_error_with_field(format!("Digest '{}' is not 20 bytes", hex_digest), "part_digests")
    })
}
