use std::sync::Arc;

use async_trait::async_trait;
use common::storage::{BlobRef, BlobStore, StorageBackend, StorageError, validate_key};

use crate::repository::FileRepository;

/// Keeps payloads in the `file_data` column of the record itself.
///
/// `put` hands the bytes back so they are written together with the row, and
/// `delete` has nothing to do because removing the row removes the bytes.
pub struct InlineBlobStore {
    repo: Arc<dyn FileRepository>,
}

impl InlineBlobStore {
    pub fn new(repo: Arc<dyn FileRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl BlobStore for InlineBlobStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Inline
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<BlobRef, StorageError> {
        validate_key(key)?;
        Ok(BlobRef::Inline(data.to_vec()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        let stored = self
            .repo
            .find_by_stored_name(key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        stored
            .and_then(|s| s.file_data)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(true)
    }

    fn locator_for(&self, _key: &str) -> Option<String> {
        None
    }
}
