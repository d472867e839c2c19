use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::BufReader;

use super::error::StorageError;
use super::key::prefixed_key;
use super::traits::{BlobRef, BlobStore, BoxReader, StorageBackend};

/// Filesystem-backed blob store.
///
/// Blobs are stored as `{base_path}/{prefix}/{key}`. Writes go through a
/// temp file in `{base_path}/.tmp` and are renamed into place, so readers
/// never observe a partial blob.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    prefix: String,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store.
    pub async fn new(base_path: PathBuf, prefix: impl Into<String>) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            prefix: prefix.into(),
        })
    }

    /// Relative locator for a key (`{prefix}/{key}`).
    fn relative(&self, key: &str) -> Result<String, StorageError> {
        prefixed_key(&self.prefix, key)
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.base_path.join(self.relative(key)?))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Filesystem
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<BlobRef, StorageError> {
        let relative = self.relative(key)?;
        let blob_path = self.base_path.join(&relative);

        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp_path, &blob_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(BlobRef::Locator(relative))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let blob_path = self.blob_path(key)?;
        match fs::read(&blob_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        let blob_path = self.blob_path(key)?;
        match fs::File::open(&blob_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(key)?;
        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn locator_for(&self, _key: &str) -> Option<String> {
        None
    }

    async fn check(&self) -> Result<(), StorageError> {
        let probe = self.temp_path();
        fs::write(&probe, b"").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}
