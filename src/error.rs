//! Error types for the big upload protocol

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-wide result type
pub type Result<T> = std::result::Result<T, UploadError>;

/// Errors surfaced by the start/chunk/end phases
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{0}")]
    InvalidParameter(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failures from the blob backend or the session store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 SDK error: {0}")]
    SdkError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UploadError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Short error name carried in the response body
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid",
            Self::NotFound(_) => "notfound",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "error",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body, `{ name, message }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            UploadError::Storage(e) => {
                // Backend detail stays in the log
                tracing::error!("Storage error: {}", e);
                "An error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorBody {
            name: self.name().to_string(),
            message,
        });

        (status, body).into_response()
    }
}
