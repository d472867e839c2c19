use axum::Json;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::ingest::{DeleteOutcome, UploadRequest};
use crate::models::audio::{AudioListItem, DeleteResponse, ListAudiosQuery, UploadResponse};
use crate::state::AppState;
use crate::utils::filename::{content_disposition, validate_flat_filename};

/// Uploader recorded when the form does not name one.
const DEFAULT_UPLOADER: &str = "api";

/// Leaves room for multipart framing around a file of `max_upload_size`.
pub fn upload_body_limit(max_upload_size: usize) -> DefaultBodyLimit {
    DefaultBodyLimit::max(max_upload_size.saturating_add(64 * 1024))
}

#[utoipa::path(
    post,
    path = "/upload-audio",
    tag = "Audio",
    operation_id = "uploadAudio",
    summary = "Upload an audio file",
    description = "Accepts any audio container/codec in the `file` multipart field, normalizes it \
        to FLAC and stores it. An optional `uploaded_by` text field is recorded with the file.",
    request_body(content_type = "multipart/form-data", description = "Audio file with optional uploader"),
    responses(
        (status = 201, description = "Audio stored", body = UploadResponse),
        (status = 400, description = "Missing, empty or oversized file (VALIDATION_ERROR), or undecodable audio (UNSUPPORTED_FORMAT)", body = ErrorBody),
        (status = 500, description = "Storage failure (STORAGE_ERROR, INTERNAL_ERROR)", body = ErrorBody),
        (status = 503, description = "Transcoder unavailable (DEPENDENCY_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart))]
pub async fn upload_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_size = state.config.server.max_upload_size;

    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut uploaded_by: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Validation("File field must have a filename".into()))?;
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .or_else(|| mime_guess::from_path(&filename).first_raw().map(str::to_string));

                let mut data = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
                {
                    if data.len() + chunk.len() > max_size {
                        return Err(AppError::Validation(format!(
                            "File exceeds maximum size of {max_size} bytes"
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }
                file = Some((filename, content_type, data));
            }
            Some("uploaded_by") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read uploaded_by: {e}")))?;
                uploaded_by = Some(text);
            }
            _ => {} // Ignore unknown fields.
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;
    let filename = validate_flat_filename(&filename)
        .map_err(|e| AppError::Validation(e.message().into()))?
        .to_string();
    if data.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".into()));
    }

    let uploaded_by = uploaded_by
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOADER.to_string());

    let receipt = state
        .ingest
        .upload_detached(UploadRequest {
            original_filename: filename,
            content_type,
            uploaded_by,
            data,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UploadResponse::from(receipt))))
}

#[utoipa::path(
    get,
    path = "/list-audios",
    tag = "Audio",
    operation_id = "listAudios",
    summary = "List stored audio files",
    description = "Returns stored files newest first. `start_time` and `end_time` are inclusive \
        bounds on the upload time; naive timestamps and dates are read as UTC.",
    params(ListAudiosQuery),
    responses(
        (status = 200, description = "Audio list", body = Vec<AudioListItem>),
        (status = 400, description = "Unparsable or inverted time range (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn list_audios(
    State(state): State<AppState>,
    Query(query): Query<ListAudiosQuery>,
) -> Result<Json<Vec<AudioListItem>>, AppError> {
    let range = query.time_range()?;
    let files = state.ingest.list(range).await?;
    Ok(Json(files.into_iter().map(AudioListItem::from).collect()))
}

#[utoipa::path(
    get,
    path = "/download-audio/{id}",
    tag = "Audio",
    operation_id = "downloadAudio",
    summary = "Download a stored audio file",
    description = "Streams the canonical FLAC payload. Supports ETag-based caching via If-None-Match.",
    params(("id" = i32, Path, description = "Audio file ID")),
    responses(
        (status = 200, description = "FLAC payload", content_type = "audio/flac"),
        (status = 304, description = "Not Modified (ETag match)"),
        (status = 404, description = "Unknown ID or missing payload (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn download_audio(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let record = state.ingest.find(id).await?;

    let etag_value = record
        .tag_str("content_sha256")
        .map(|hash| format!("\"{hash}\""));
    if let Some(etag) = &etag_value
        && let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && let Ok(val) = if_none_match.to_str()
        && if_none_match_hits(val, etag)
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let download = state.ingest.open(&record).await?;
    let body = Body::from_stream(ReaderStream::new(download.reader));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&download.filename),
        )
        .header(header::CACHE_CONTROL, "private, max-age=3600");
    if let Some(length) = download.content_length {
        response = response.header(header::CONTENT_LENGTH, length.to_string());
    }
    if let Some(etag) = &etag_value {
        response = response.header(header::ETAG, etag);
    }

    response
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

/// Weak comparison of an `If-None-Match` list against our strong `etag`.
fn if_none_match_hits(header_value: &str, etag: &str) -> bool {
    header_value
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || tag.strip_prefix("W/").unwrap_or(tag) == etag)
}

#[utoipa::path(
    delete,
    path = "/delete-audio/{id}",
    tag = "Audio",
    operation_id = "deleteAudio",
    summary = "Delete a stored audio file",
    description = "Removes the payload (best effort) and then the record.",
    params(("id" = i32, Path, description = "Audio file ID")),
    responses(
        (status = 200, description = "Audio deleted", body = DeleteResponse),
        (status = 404, description = "Unknown ID (NOT_FOUND)", body = ErrorBody),
        (status = 500, description = "Record could not be deleted (STORAGE_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn delete_audio(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DeleteResponse>, AppError> {
    match state.ingest.delete(id).await? {
        DeleteOutcome::Deleted { id } => Ok(Json(DeleteResponse {
            status: "deleted",
            id,
        })),
        DeleteOutcome::NotFound => Err(AppError::NotFound("Audio file not found".into())),
    }
}
