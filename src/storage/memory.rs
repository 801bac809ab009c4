//! In-memory storage backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, RingError};
use crate::storage::backend::{StorageBackend, StorageType};

type Namespaces = HashMap<String, HashMap<String, Bytes>>;

/// Blob store backed by a `RwLock<HashMap>` per namespace.
///
/// Used by tests and by the scenario runner when no directory is given.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    namespaces: RwLock<Namespaces>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a namespace currently exists
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.read().map(|map| map.contains_key(namespace)).unwrap_or(false)
    }

    /// Total number of blobs across all namespaces
    pub fn blob_count(&self) -> usize {
        self.read().map(|map| map.values().map(|ns| ns.len()).sum()).unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Namespaces>> {
        self.namespaces
            .read()
            .map_err(|_| RingError::storage_error("Memory backend lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Namespaces>> {
        self.namespaces
            .write()
            .map_err(|_| RingError::storage_error("Memory backend lock poisoned"))
    }
}

fn missing_namespace(namespace: &str) -> RingError {
    RingError::storage_error_with_namespace("Namespace does not exist", namespace)
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.write()?.entry(namespace.to_string()).or_default();
        debug!(namespace, "created memory namespace");
        Ok(())
    }

    async fn destroy_namespace(&self, namespace: &str) -> Result<()> {
        if let Some(blobs) = self.write()?.remove(namespace) {
            debug!(namespace, blobs = blobs.len(), "destroyed memory namespace");
        }
        Ok(())
    }

    async fn put(&self, namespace: &str, name: &str, data: Bytes) -> Result<()> {
        let mut map = self.write()?;
        let blobs = map.get_mut(namespace).ok_or_else(|| missing_namespace(namespace))?;
        trace!(namespace, name, size = data.len(), "storing blob in memory");
        blobs.insert(name.to_string(), data);
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Bytes>> {
        let map = self.read()?;
        let blobs = map.get(namespace).ok_or_else(|| missing_namespace(namespace))?;
        Ok(blobs.get(name).cloned())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if let Some(blobs) = self.write()?.get_mut(namespace) {
            blobs.remove(name);
        }
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let map = self.read()?;
        let blobs = map.get(namespace).ok_or_else(|| missing_namespace(namespace))?;
        let mut names: Vec<String> = blobs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn move_blob(&self, from: &str, to: &str, name: &str) -> Result<()> {
        let mut map = self.write()?;
        if !map.contains_key(to) {
            return Err(missing_namespace(to));
        }
        let data = map
            .get_mut(from)
            .ok_or_else(|| missing_namespace(from))?
            .remove(name)
            .ok_or_else(|| RingError::storage_error_with_namespace(format!("Blob '{}' not found", name), from))?;
        if let Some(target) = map.get_mut(to) {
            target.insert(name.to_string(), data);
        }
        trace!(from, to, name, "moved blob in memory");
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}
