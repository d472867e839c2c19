use std::fmt;
use std::io::Cursor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Which storage implementation is active for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Bytes live in the `file_data` column of the record itself.
    Inline,
    /// Bytes live in an S3-compatible bucket.
    Object,
    /// Bytes live under a local directory.
    Filesystem,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Object => "object",
            Self::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stored payload can be found again.
///
/// Returned by [`BlobStore::put`] and persisted with the metadata record.
#[derive(Clone, PartialEq, Eq)]
pub enum BlobRef {
    /// An external locator (URL or backend-relative path).
    Locator(String),
    /// The payload itself, to be written alongside the record.
    Inline(Vec<u8>),
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locator(locator) => f.debug_tuple("Locator").field(locator).finish(),
            Self::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
        }
    }
}

/// Key-addressed blob storage.
///
/// Keys are the generated stored names; implementations map them onto their
/// own namespace (bucket prefix, directory, table row).
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Store bytes under `key` and return the reference to persist.
    async fn put(&self, key: &str, data: &[u8], content_type: &str)
    -> Result<BlobRef, StorageError>;

    /// Retrieve all bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Retrieve a blob as a streaming async reader.
    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        let data = self.get(key).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    /// Delete the blob stored under `key`.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    /// Deleting a missing key is never an error.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Public URL for `key`, if this backend serves blobs directly.
    fn locator_for(&self, key: &str) -> Option<String>;

    /// Verify the backend is reachable. Called once at startup.
    async fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
