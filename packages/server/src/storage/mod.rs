mod inline;

use std::sync::Arc;

use anyhow::Context;
use common::storage::filesystem::FilesystemBlobStore;
use common::storage::object::{ObjectBlobStore, ObjectStoreConfig};
use common::storage::{BlobStore, StorageBackend};
use tracing::info;

pub use inline::InlineBlobStore;

use crate::config::StorageConfig;
use crate::repository::FileRepository;

/// Build the blob store selected by `storage.backend` and check it is reachable.
pub async fn build_blob_store(
    config: &StorageConfig,
    repo: Arc<dyn FileRepository>,
) -> anyhow::Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.backend {
        StorageBackend::Inline => Arc::new(InlineBlobStore::new(repo)),
        StorageBackend::Object => {
            let object = &config.object;
            let bucket = object
                .bucket
                .clone()
                .context("storage.object.bucket is required for the object backend")?;
            let store = ObjectBlobStore::new(ObjectStoreConfig {
                bucket,
                region: object.region.clone(),
                endpoint: object.endpoint.clone(),
                access_key: object.access_key.clone(),
                secret_key: object.secret_key.clone(),
                public_base_url: object.public_base_url.clone(),
                path_style: object.path_style,
                key_prefix: config.key_prefix.clone(),
                timeout: config.timeout(),
            })
            .context("Failed to configure object storage")?;
            Arc::new(store)
        }
        StorageBackend::Filesystem => {
            let root = config
                .filesystem
                .root
                .clone()
                .context("storage.filesystem.root is required for the filesystem backend")?;
            let store = FilesystemBlobStore::new(root.clone(), config.key_prefix.clone())
                .await
                .with_context(|| format!("Failed to open blob directory {}", root.display()))?;
            Arc::new(store)
        }
    };

    store
        .check()
        .await
        .with_context(|| format!("{} blob store is not reachable", store.backend()))?;
    info!(backend = %store.backend(), "Blob store ready");

    Ok(store)
}
