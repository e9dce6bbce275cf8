/// Error types for the image service
///
/// This module defines all error types that can occur across the ingest
/// API and the processing worker. Errors are converted to appropriate
/// HTTP responses for API clients.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use std::fmt;

/// Result type for image-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Magic-byte detection failed or the payload is not an image
    InvalidFileFormat(String),

    /// Upload exceeded the configured size limit
    FileTooLarge(String),

    /// No image row for the requested id
    ImageNotFound,

    /// No processed variant for the requested (image, operation)
    ProcessedImageNotFound,

    /// Object-store object is absent
    ObjectNotFound(String),

    /// Object-store operation failed
    Storage(String),

    /// Database operation failed
    Database(String),

    /// Broker publish/consume/commit failed
    MessageQueue(String),

    /// Path sanitisation rejected an externally influenced path
    InvalidPath(String),

    /// Image bytes could not be decoded
    Decode(String),

    /// A transform operation failed
    OperationFailed(String),

    /// Operation type is declared but not implemented
    UnsupportedOperation(String),

    /// Malformed client request
    BadRequest(String),

    /// Anything else
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidFileFormat(msg) => write!(f, "invalid file format: {}", msg),
            AppError::FileTooLarge(msg) => write!(f, "file too large: {}", msg),
            AppError::ImageNotFound => write!(f, "image not found"),
            AppError::ProcessedImageNotFound => write!(f, "processed image not found"),
            AppError::ObjectNotFound(path) => write!(f, "object not found: {}", path),
            AppError::Storage(msg) => write!(f, "storage error: {}", msg),
            AppError::Database(msg) => write!(f, "database error: {}", msg),
            AppError::MessageQueue(msg) => write!(f, "message queue error: {}", msg),
            AppError::InvalidPath(msg) => write!(f, "invalid path: {}", msg),
            AppError::Decode(msg) => write!(f, "decode error: {}", msg),
            AppError::OperationFailed(msg) => write!(f, "operation failed: {}", msg),
            AppError::UnsupportedOperation(op) => write!(f, "unsupported operation type: {}", op),
            AppError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidFileFormat(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ImageNotFound
            | AppError::ProcessedImageNotFound
            | AppError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
            // Sanitisation failures are programmer/security errors and are
            // never detailed to clients.
            AppError::InvalidPath(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(_)
            | AppError::Database(_)
            | AppError::MessageQueue(_)
            | AppError::Decode(_)
            | AppError::OperationFailed(_)
            | AppError::UnsupportedOperation(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = match self {
            // Internal failure classes keep their details in the logs only.
            AppError::Storage(_) | AppError::Database(_) | AppError::MessageQueue(_) => {
                "request failed".to_string()
            }
            AppError::InvalidPath(_) | AppError::Internal(_) => "internal error".to_string(),
            // Object keys are server internals.
            AppError::ObjectNotFound(_) => "image data not found".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status).json(ErrorBody {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message,
        })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
