use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::storage::{BlobRef, BlobStore, BoxReader, ContentHash, StorageError};
use common::transcode::{TranscodeError, TranscodeOutput, Transcoder, extension_hint};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{FileRecord, FileRepository, NewFileRecord, Tags, TimeRange};

/// Progress of a single upload. Transitions are logged as they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Received,
    Encoded,
    BlobWritten,
    RecordWritten,
    Committed,
    CompensatingCleanup,
    Failed,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Encoded => "encoded",
            Self::BlobWritten => "blob_written",
            Self::RecordWritten => "record_written",
            Self::Committed => "committed",
            Self::CompensatingCleanup => "compensating_cleanup",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Input(String),

    #[error("unsupported audio: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    NotFound(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A store call failed mid-request. Nothing is visible to readers, so the
    /// client may retry.
    #[error("{stage} failed: {message}")]
    TransientStore {
        stage: &'static str,
        message: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl From<TranscodeError> for IngestError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::EmptyInput => IngestError::Input("Uploaded file is empty".into()),
            TranscodeError::UnsupportedFormat(detail) => IngestError::UnsupportedFormat(detail),
            TranscodeError::DecoderUnavailable(detail) => {
                IngestError::DependencyUnavailable(detail)
            }
            other => IngestError::Internal(other.to_string()),
        }
    }
}

fn store_failure(stage: &'static str, err: impl fmt::Display) -> IngestError {
    IngestError::TransientStore {
        stage,
        message: err.to_string(),
    }
}

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub uploaded_by: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub id: i32,
    pub stored_name: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub file_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { id: i32 },
    NotFound,
}

/// A record as shown in listings, with a resolvable URL.
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub record: FileRecord,
    pub file_url: String,
}

/// A payload ready to stream back to the client.
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub content_length: Option<u64>,
    /// Hex SHA-256 of the stored bytes, when recorded.
    pub content_hash: Option<String>,
    pub reader: BoxReader,
}

/// Relative path serving the payload of record `id`.
pub fn download_path(id: i32) -> String {
    format!("/download-audio/{id}")
}

/// Coordinates the transcoder, the blob store and the metadata repository.
#[derive(Clone)]
pub struct IngestService {
    transcoder: Arc<dyn Transcoder>,
    blobs: Arc<dyn BlobStore>,
    repo: Arc<dyn FileRepository>,
}

impl IngestService {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        blobs: Arc<dyn BlobStore>,
        repo: Arc<dyn FileRepository>,
    ) -> Self {
        Self {
            transcoder,
            blobs,
            repo,
        }
    }

    /// Run [`upload`](Self::upload) on its own task.
    ///
    /// The pipeline finishes (or compensates) even if the caller is dropped
    /// halfway, e.g. when the client disconnects.
    pub async fn upload_detached(
        &self,
        request: UploadRequest,
    ) -> Result<UploadReceipt, IngestError> {
        let service = self.clone();
        tokio::spawn(async move { service.upload(request).await })
            .await
            .map_err(|e| IngestError::Internal(format!("Upload task failed: {e}")))?
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, IngestError> {
        let extension = extension_hint(&request.original_filename);
        debug!(
            stage = %UploadStage::Received,
            filename = %request.original_filename,
            size = request.data.len(),
            "Upload received"
        );

        let output = match self.transcoder.transcode(&request.data, &extension).await {
            Ok(output) => output,
            Err(err) => {
                warn!(stage = %UploadStage::Failed, error = %err, "Transcode failed");
                return Err(err.into());
            }
        };

        let stored_name = format!("{}.{}", Uuid::new_v4(), output.format.extension());
        let hash = ContentHash::compute(&output.bytes);
        info!(
            stage = %UploadStage::Encoded,
            stored_name = %stored_name,
            size = output.bytes.len(),
            duration_ms = output.audio.duration_ms,
            "Audio encoded"
        );

        let blob_ref = match self
            .blobs
            .put(&stored_name, &output.bytes, output.format.content_type())
            .await
        {
            Ok(blob_ref) => blob_ref,
            Err(err) => {
                warn!(
                    stage = %UploadStage::Failed,
                    stored_name = %stored_name,
                    error = %err,
                    "Blob write failed"
                );
                return Err(store_failure(UploadStage::BlobWritten.as_str(), err));
            }
        };
        info!(stage = %UploadStage::BlobWritten, stored_name = %stored_name, "Blob written");

        let tags = build_tags(&request, &extension, &output, &hash);
        let (file_url, file_data) = match blob_ref {
            BlobRef::Locator(locator) => (Some(locator), None),
            BlobRef::Inline(bytes) => (None, Some(bytes)),
        };

        let record = match self
            .repo
            .insert(NewFileRecord {
                stored_name: stored_name.clone(),
                tags,
                file_url,
                file_data,
            })
            .await
        {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    stage = %UploadStage::CompensatingCleanup,
                    stored_name = %stored_name,
                    error = %err,
                    "Record insert failed, removing blob"
                );
                self.compensate(&stored_name).await;
                warn!(stage = %UploadStage::Failed, stored_name = %stored_name, "Upload failed");
                return Err(store_failure(UploadStage::RecordWritten.as_str(), err));
            }
        };
        info!(
            stage = %UploadStage::RecordWritten,
            stored_name = %stored_name,
            id = record.id,
            "Record written"
        );

        let receipt = UploadReceipt {
            id: record.id,
            file_url: self.file_url(&record),
            stored_name: record.stored_name,
            original_filename: request.original_filename,
            created_at: record.created_at,
        };
        info!(
            stage = %UploadStage::Committed,
            stored_name = %receipt.stored_name,
            id = receipt.id,
            "Upload committed"
        );

        Ok(receipt)
    }

    /// Best-effort removal of a blob whose record was never written.
    async fn compensate(&self, stored_name: &str) {
        match self.blobs.delete(stored_name).await {
            Ok(_) => debug!(stored_name, "Compensating blob delete succeeded"),
            Err(err) => error!(
                stored_name,
                error = %err,
                compensation = "blob_delete",
                "Compensation failed, blob may be orphaned"
            ),
        }
    }

    pub async fn list(&self, range: TimeRange) -> Result<Vec<ListedFile>, IngestError> {
        let records = self
            .repo
            .list(range)
            .await
            .map_err(|e| store_failure("list", e))?;

        Ok(records
            .into_iter()
            .map(|record| ListedFile {
                file_url: self.file_url(&record),
                record,
            })
            .collect())
    }

    pub async fn find(&self, id: i32) -> Result<FileRecord, IngestError> {
        self.repo
            .get(id)
            .await
            .map_err(|e| store_failure("lookup", e))?
            .ok_or_else(|| IngestError::NotFound("Audio file not found".into()))
    }

    pub async fn download(&self, id: i32) -> Result<Download, IngestError> {
        let record = self.find(id).await?;
        self.open(&record).await
    }

    /// Open the payload of an already looked-up record.
    pub async fn open(&self, record: &FileRecord) -> Result<Download, IngestError> {
        let reader = self
            .blobs
            .get_stream(&record.stored_name)
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => {
                    warn!(
                        id = record.id,
                        stored_name = %record.stored_name,
                        "Record has no retrievable blob"
                    );
                    IngestError::NotFound("Audio payload not found".into())
                }
                other => store_failure("blob_read", other),
            })?;

        Ok(Download {
            filename: suggested_filename(record),
            content_type: common::transcode::CanonicalFormat::Flac.content_type(),
            content_length: record.tags.get("size").and_then(Value::as_u64),
            content_hash: record.tag_str("content_sha256").map(str::to_string),
            reader,
        })
    }

    /// Delete the blob (best effort), then the record.
    pub async fn delete(&self, id: i32) -> Result<DeleteOutcome, IngestError> {
        let Some(record) = self
            .repo
            .get(id)
            .await
            .map_err(|e| store_failure("lookup", e))?
        else {
            return Ok(DeleteOutcome::NotFound);
        };

        match self.blobs.delete(&record.stored_name).await {
            Ok(existed) => debug!(id, stored_name = %record.stored_name, existed, "Blob deleted"),
            Err(err) => warn!(
                id,
                stored_name = %record.stored_name,
                error = %err,
                "Blob delete failed, removing record anyway"
            ),
        }

        let removed = self
            .repo
            .delete(id)
            .await
            .map_err(|e| store_failure("record_delete", e))?;
        if !removed {
            return Ok(DeleteOutcome::NotFound);
        }

        info!(id, stored_name = %record.stored_name, "Audio file deleted");
        Ok(DeleteOutcome::Deleted { id })
    }

    /// Public URL when the backend has one, otherwise the download route.
    fn file_url(&self, record: &FileRecord) -> String {
        self.blobs
            .locator_for(&record.stored_name)
            .unwrap_or_else(|| download_path(record.id))
    }
}

fn build_tags(
    request: &UploadRequest,
    extension: &str,
    output: &TranscodeOutput,
    hash: &ContentHash,
) -> Tags {
    let mut tags = Tags::new();
    tags.insert("original_filename".into(), request.original_filename.clone().into());
    tags.insert("original_extension".into(), extension.into());
    tags.insert("uploaded_by".into(), request.uploaded_by.clone().into());
    if let Some(content_type) = &request.content_type {
        tags.insert("original_content_type".into(), content_type.clone().into());
    }
    tags.insert("original_size".into(), request.data.len().into());
    tags.insert("canonical_format".into(), output.format.extension().into());
    tags.insert("content_sha256".into(), hash.to_hex().into());
    tags.insert("size".into(), output.bytes.len().into());
    tags.insert("sample_rate".into(), output.audio.sample_rate.into());
    tags.insert("channels".into(), output.audio.channels.into());
    if let Some(bits) = output.audio.bits_per_sample {
        tags.insert("bits_per_sample".into(), bits.into());
    }
    tags.insert("duration_ms".into(), output.audio.duration_ms.into());
    tags
}

/// `{original stem}.flac`, or the stored name when the original is unknown.
fn suggested_filename(record: &FileRecord) -> String {
    record
        .tag_str("original_filename")
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| format!("{stem}.flac"))
        .unwrap_or_else(|| record.stored_name.clone())
}
