//! Error types for the relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Message log error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blob store error.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// TLS setup error.
    #[error("tls error: {0}")]
    Tls(String),

    /// A peer could not take the frames it was owed.
    #[error("peer delivery failed: {0}")]
    Delivery(#[from] crate::registry::DeliveryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message log errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The log has handed out every 32-bit id.
    #[error("message id space exhausted at {0}")]
    IdSpaceExhausted(i64),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Blob store errors.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob stored under this hash.
    #[error("blob not found: {hash}")]
    NotFound {
        /// The requested content hash.
        hash: String,
    },

    /// Hash is not 64 lowercase hex characters.
    #[error("invalid content hash: {0:?}")]
    InvalidHash(String),

    /// Uploaded bytes do not hash to the claimed address.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Claimed content hash.
        expected: String,
        /// Hash of the received bytes.
        actual: String,
    },

    /// Upload exceeds the configured size limit.
    #[error("blob too large: more than {limit} bytes")]
    TooLarge {
        /// Maximum allowed size.
        limit: u64,
    },

    /// Disk read/write failure.
    #[error("blob storage fault: {0}")]
    Storage(String),
}

impl IntoResponse for BlobError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            BlobError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            BlobError::InvalidHash(_) | BlobError::HashMismatch { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            BlobError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            BlobError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "blob storage error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
