use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::ingest::{ListedFile, UploadReceipt};
use crate::repository::TimeRange;

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

/// Query parameters for listing audio files.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ListAudiosQuery {
    /// Inclusive lower bound on `created_at`. RFC 3339, naive (UTC) or a date.
    #[param(example = "2025-03-01T00:00:00Z")]
    pub start_time: Option<String>,
    /// Inclusive upper bound on `created_at`.
    #[param(example = "2025-03-01T23:59:59+05:30")]
    pub end_time: Option<String>,
}

impl ListAudiosQuery {
    pub fn time_range(&self) -> Result<TimeRange, AppError> {
        let start = parse_bound("start_time", self.start_time.as_deref())?;
        let end = parse_bound("end_time", self.end_time.as_deref())?;
        TimeRange::new(start, end).map_err(|e| AppError::Validation(e.to_string()))
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value).map(Some).ok_or_else(|| {
            AppError::Validation(format!(
                "Invalid {name} '{value}': expected an RFC 3339 timestamp, \
                 'YYYY-MM-DDTHH:MM:SS' (UTC) or 'YYYY-MM-DD'"
            ))
        }),
    }
}

/// Parse a client-supplied timestamp and normalize it to UTC.
///
/// Accepts RFC 3339 with any offset, naive date-times (taken as UTC, with `T`
/// or a space between date and time) and bare dates (midnight UTC). A `+` in
/// the offset that form decoding turned into a space is restored.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(dt) = parse_with_offset(s) {
        return Some(dt);
    }

    if let Some((head, tail)) = s.rsplit_once(' ')
        && head.contains(':')
        && is_bare_offset(tail)
        && let Some(dt) = parse_with_offset(&format!("{head}+{tail}"))
    {
        return Some(dt);
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_with_offset(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"]
        .into_iter()
        .find_map(|format| DateTime::parse_from_str(s, format).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `HH:MM` or `HHMM`.
fn is_bare_offset(s: &str) -> bool {
    let digits: Vec<char> = s.chars().filter(|c| *c != ':').collect();
    let shape_ok = match s.len() {
        5 => s.as_bytes()[2] == b':',
        4 => true,
        _ => false,
    };
    shape_ok && digits.len() == 4 && digits.iter().all(char::is_ascii_digit)
}

// ---------------------------------------------------------------------------
// Response DTOs
// ---------------------------------------------------------------------------

/// Health probe response.
#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    #[schema(example = true)]
    pub ok: bool,
}

/// Response DTO for a completed upload.
#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    /// Record ID.
    #[schema(example = 1)]
    pub id: i32,
    /// Generated storage name of the canonical payload.
    #[schema(example = "3f2b8c1e-6d0a-4e4b-9a52-0c7d1f9e8a21.flac")]
    pub stored_name: String,
    #[schema(example = "interview.m4a")]
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    /// Public URL of the payload, or the download route.
    #[schema(example = "/download-audio/1")]
    pub file_url: String,
    #[schema(example = "uploaded")]
    pub status: &'static str,
}

impl From<UploadReceipt> for UploadResponse {
    fn from(receipt: UploadReceipt) -> Self {
        Self {
            id: receipt.id,
            stored_name: receipt.stored_name,
            original_filename: receipt.original_filename,
            created_at: receipt.created_at,
            file_url: receipt.file_url,
            status: "uploaded",
        }
    }
}

/// One entry of the audio listing.
#[derive(Serialize, utoipa::ToSchema)]
pub struct AudioListItem {
    #[schema(example = 1)]
    pub id: i32,
    /// Original upload filename.
    #[schema(example = "interview.m4a")]
    pub file_name: String,
    #[schema(example = "/download-audio/1")]
    pub file_url: String,
    /// Tags recorded at upload time.
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<ListedFile> for AudioListItem {
    fn from(listed: ListedFile) -> Self {
        let record = listed.record;
        let file_name = record
            .tag_str("original_filename")
            .map(str::to_string)
            .unwrap_or_else(|| record.stored_name.clone());
        Self {
            id: record.id,
            file_name,
            file_url: listed.file_url,
            metadata: Value::Object(record.tags),
            created_at: record.created_at,
        }
    }
}

/// Response DTO for a completed delete.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DeleteResponse {
    #[schema(example = "deleted")]
    pub status: &'static str,
    #[schema(example = 1)]
    pub id: i32,
}
