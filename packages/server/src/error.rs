use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::ingest::IngestError;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`,
    /// `UNSUPPORTED_FORMAT`, `NOT_FOUND`, `DEPENDENCY_UNAVAILABLE`,
    /// `STORAGE_ERROR`, `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "Missing 'file' field")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    UnsupportedFormat(String),
    NotFound(String),
    DependencyUnavailable(String),
    /// A store call failed. The detail is logged, not returned.
    Storage(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::UnsupportedFormat(detail) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "UNSUPPORTED_FORMAT",
                    message: format!("Unsupported or corrupt audio: {detail}"),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::DependencyUnavailable(detail) => {
                tracing::error!("Dependency unavailable: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody {
                        code: "DEPENDENCY_UNAVAILABLE",
                        message: "Audio processing is temporarily unavailable".into(),
                    },
                )
            }
            AppError::Storage(detail) => {
                tracing::error!("Storage error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "STORAGE_ERROR",
                        message: "The file could not be stored or retrieved, please retry".into(),
                    },
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Input(msg) => AppError::Validation(msg),
            IngestError::UnsupportedFormat(detail) => AppError::UnsupportedFormat(detail),
            IngestError::NotFound(msg) => AppError::NotFound(msg),
            IngestError::DependencyUnavailable(detail) => AppError::DependencyUnavailable(detail),
            err @ IngestError::TransientStore { .. } => AppError::Storage(err.to_string()),
            IngestError::Internal(detail) => AppError::Internal(detail),
        }
    }
}
