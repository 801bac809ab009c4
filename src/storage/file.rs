//! File storage module
//!
//! Keeps each node's namespace as a directory under a base path and each
//! blob as one file inside it: `{base}/{namespace}/{name}.txt`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, error, trace};

use crate::error::{Result, RingError};
use crate::storage::backend::{validate_name, StorageBackend, StorageType};

const BLOB_EXTENSION: &str = "txt";
const TMP_EXTENSION: &str = "tmp";

/// Directory-per-namespace blob store
#[derive(Debug, Clone)]
pub struct FileBackend {
    /// Base directory holding one subdirectory per namespace
    base_path: PathBuf,
}

impl FileBackend {
    /// Create a new file backend rooted at `base_path`
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            error!("Failed to create base directory '{}': {}", base_path.display(), e);
            RingError::storage_error_full("Failed to create base directory", base_path.display().to_string(), e.to_string())
        })?;
        debug!("File backend rooted at {}", base_path.display());
        Ok(Self { base_path })
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory backing a namespace
    pub fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.base_path.join(namespace)
    }

    /// File backing a blob
    pub fn blob_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.namespace_path(namespace).join(format!("{}.{}", name, BLOB_EXTENSION))
    }

    async fn require_namespace(&self, namespace: &str) -> Result<PathBuf> {
        validate_name(namespace)?;
        let dir = self.namespace_path(namespace);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(RingError::storage_error_with_namespace("Namespace path is not a directory", namespace)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RingError::storage_error_with_namespace("Namespace does not exist", namespace))
            }
            Err(e) => Err(RingError::storage_error_full("Failed to stat namespace", namespace, e.to_string())),
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        validate_name(namespace)?;
        let dir = self.namespace_path(namespace);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RingError::storage_error_full("Failed to create namespace", namespace, e.to_string()))?;
        debug!("Created namespace directory {}", dir.display());
        Ok(())
    }

    async fn destroy_namespace(&self, namespace: &str) -> Result<()> {
        validate_name(namespace)?;
        let dir = self.namespace_path(namespace);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Removed namespace directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RingError::storage_error_full("Failed to destroy namespace", namespace, e.to_string())),
        }
    }

    async fn put(&self, namespace: &str, name: &str, data: Bytes) -> Result<()> {
        validate_name(name)?;
        self.require_namespace(namespace).await?;

        // Write to a temp file first so a reader never sees a partial blob
        let path = self.blob_path(namespace, name);
        let tmp_path = path.with_extension(TMP_EXTENSION);
        fs::write(&tmp_path, &data)
            .await
            .map_err(|e| RingError::storage_error_full("Failed to write blob", namespace, e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| RingError::storage_error_full("Failed to commit blob", namespace, e.to_string()))?;

        trace!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Bytes>> {
        validate_name(name)?;
        self.require_namespace(namespace).await?;
        match fs::read(self.blob_path(namespace, name)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RingError::storage_error_full("Failed to read blob", namespace, e.to_string())),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        validate_name(name)?;
        match fs::remove_file(self.blob_path(namespace, name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RingError::storage_error_full("Failed to delete blob", namespace, e.to_string())),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.require_namespace(namespace).await?;
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| RingError::storage_error_full("Failed to list namespace", namespace, e.to_string()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn move_blob(&self, from: &str, to: &str, name: &str) -> Result<()> {
        validate_name(name)?;
        self.require_namespace(from).await?;
        self.require_namespace(to).await?;

        let src = self.blob_path(from, name);
        let dst = self.blob_path(to, name);
        fs::rename(&src, &dst)
            .await
            .map_err(|e| RingError::storage_error_full(format!("Failed to move blob '{}'", name), from, e.to_string()))?;

        trace!("Moved {} -> {}", src.display(), dst.display());
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::File
    }
}
