use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::debug;

use super::error::StorageError;
use super::key::prefixed_key;
use super::traits::{BlobRef, BlobStore, StorageBackend};

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, R2, Supabase storage, ...). AWS when unset.
    pub endpoint: Option<String>,
    /// Credentials fall back to the environment/profile chain when unset.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Base for public URLs. Defaults to the bucket URL.
    pub public_base_url: Option<String>,
    pub path_style: bool,
    pub key_prefix: String,
    pub timeout: Duration,
}

/// Blob store backed by an S3-compatible bucket.
pub struct ObjectBlobStore {
    bucket: Box<Bucket>,
    key_prefix: String,
    public_base_url: String,
    timeout: Duration,
}

impl ObjectBlobStore {
    pub fn new(config: ObjectStoreConfig) -> Result<Self, StorageError> {
        let region = match config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint,
            },
            None => config
                .region
                .parse::<Region>()
                .map_err(|e| StorageError::Backend(format!("invalid region: {e}")))?,
        };

        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid credentials: {e}")))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::Backend(format!("invalid bucket config: {e}")))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        let public_base_url = config
            .public_base_url
            .unwrap_or_else(|| bucket.url())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bucket,
            key_prefix: config.key_prefix,
            public_base_url,
            timeout: config.timeout,
        })
    }

    fn object_path(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("/{}", prefixed_key(&self.key_prefix, key)?))
    }

    /// Run a bucket call under the configured timeout.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, S3Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(S3Error::HttpFailWithBody(404, _))) => {
                Err(StorageError::NotFound(operation.to_string()))
            }
            Ok(Err(e)) => Err(StorageError::Backend(format!("{operation}: {e}"))),
            Err(_) => Err(StorageError::Timeout {
                operation,
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Object
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<BlobRef, StorageError> {
        let path = self.object_path(key)?;
        let response = self
            .bounded(
                "put",
                self.bucket
                    .put_object_with_content_type(&path, data, content_type),
            )
            .await?;

        let status = response.status_code();
        if !is_success(status) {
            return Err(StorageError::Backend(format!(
                "put {path} returned HTTP {status}"
            )));
        }

        debug!(path = %path, size = data.len(), "Object stored");
        let locator = self
            .locator_for(key)
            .unwrap_or_else(|| path.trim_start_matches('/').to_string());
        Ok(BlobRef::Locator(locator))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        let response = match self.bounded("get", self.bucket.get_object(&path)).await {
            Ok(response) => response,
            Err(StorageError::NotFound(_)) => return Err(StorageError::NotFound(key.to_string())),
            Err(e) => return Err(e),
        };

        match response.status_code() {
            404 => Err(StorageError::NotFound(key.to_string())),
            status if is_success(status) => Ok(response.bytes().to_vec()),
            status => Err(StorageError::Backend(format!(
                "get {path} returned HTTP {status}"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        let response = match self
            .bounded("delete", self.bucket.delete_object(&path))
            .await
        {
            Ok(response) => response,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        match response.status_code() {
            404 => Ok(false),
            status if is_success(status) => Ok(true),
            status => Err(StorageError::Backend(format!(
                "delete {path} returned HTTP {status}"
            ))),
        }
    }

    fn locator_for(&self, key: &str) -> Option<String> {
        let path = prefixed_key(&self.key_prefix, key).ok()?;
        Some(format!("{}/{}", self.public_base_url, path))
    }

    async fn check(&self) -> Result<(), StorageError> {
        let path = self.object_path(".reachability-probe")?;
        match self.bounded("check", self.bucket.head_object(&path)).await {
            Ok((_, status)) if is_success(status) || status == 404 => Ok(()),
            Ok((_, status)) => Err(StorageError::Backend(format!(
                "bucket probe returned HTTP {status}"
            ))),
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
