//! Error types for the MediaVault server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upload incomplete: {uploaded} of {expected} chunks staged")]
    IncompleteUpload {
        uploaded: usize,
        expected: u32,
        missing_index: Option<u32>,
    },

    #[error("Reassembly failed: {0}")]
    ReassemblyFailed(String),

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_index: Option<u32>,
}

impl ErrorResponse {
    fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            uploaded: None,
            expected: None,
            missing_index: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::InvalidArgument(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("invalid_argument", msg.clone()),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("not_found", msg.clone()),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::new("conflict", msg.clone()),
            ),
            AppError::IncompleteUpload {
                uploaded,
                expected,
                missing_index,
            } => {
                let message = match missing_index {
                    Some(index) => format!("Missing chunk index {}", index),
                    None => "Not all chunks uploaded yet".to_string(),
                };
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse {
                        error: "incomplete_upload".to_string(),
                        message,
                        uploaded: Some(*uploaded),
                        expected: Some(*expected),
                        missing_index: *missing_index,
                    },
                )
            }
            AppError::ReassemblyFailed(msg) => {
                tracing::error!("Reassembly failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("reassembly_failed", "Reassembly failed".to_string()),
                )
            }
            AppError::IntegrityError(msg) => {
                tracing::error!("Integrity error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("integrity_error", "Storage integrity error".to_string()),
                )
            }
            AppError::Storage(e) => match e {
                StorageError::ObjectNotFound(key) => (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new("not_found", format!("Object not found: {}", key)),
                ),
                _ => {
                    tracing::error!("Storage error: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::new("storage_error", "Storage error".to_string()),
                    )
                }
            },
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("database_error", "Database error".to_string()),
                )
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("io_error", "IO error".to_string()),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
