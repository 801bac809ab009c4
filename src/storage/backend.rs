//! Storage backend abstraction for ring nodes
//!
//! Every node owns one namespace in the backend and keeps one blob per
//! logical name inside it. The ring core only talks to this trait, so
//! records can live in memory, on local disk, or anywhere else.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, RingError};

/// Where a record's blob lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Owning node's namespace
    pub namespace: String,
    /// Logical name of the blob
    pub name: String,
}

impl Location {
    /// Create a new location
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Same blob name inside another namespace
    pub fn relocated(&self, namespace: &str) -> Self {
        Self::new(namespace, self.name.clone())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Abstract blob store used by the ring
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ==================== Namespace Lifecycle ====================

    /// Create a namespace (no-op if it exists)
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Destroy a namespace and every blob in it (no-op if it is missing)
    async fn destroy_namespace(&self, namespace: &str) -> Result<()>;

    // ==================== Blob Operations ====================

    /// Write a blob, replacing any blob with the same name
    async fn put(&self, namespace: &str, name: &str, data: Bytes) -> Result<()>;

    /// Read a blob; `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Bytes>>;

    /// Delete a blob (no-op if it does not exist)
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// List blob names in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<String>>;

    /// Move a blob to another namespace.
    ///
    /// Either the blob ends up only in `to`, or the call fails with the
    /// source untouched.
    async fn move_blob(&self, from: &str, to: &str, name: &str) -> Result<()> {
        let data = self
            .get(from, name)
            .await?
            .ok_or_else(|| RingError::storage_error_with_namespace(format!("Blob '{}' not found", name), from))?;

        self.put(to, name, data).await?;

        if let Err(e) = self.delete(from, name).await {
            // Undo the copy so only the source holds the blob
            let _ = self.delete(to, name).await;
            return Err(e);
        }
        Ok(())
    }

    // ==================== Metadata ====================

    /// Storage type identifier
    fn storage_type(&self) -> StorageType;
}

/// Storage type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// In-process hash maps
    Memory,
    /// One directory per namespace on local disk
    File,
}

/// Reject blob and namespace names that would escape their directory
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RingError::validation_error_with_field("Name cannot be empty", "name"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(RingError::validation_error_with_field(
            format!("Name '{}' contains a path separator or is reserved", name),
            "name",
        ));
    }
    Ok(())
}
