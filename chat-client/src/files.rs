//! HTTP client for the relay's blob endpoints.
//!
//! Blobs are already encrypted when they reach this client; it only moves
//! bytes and reports progress. Certificate verification is disabled to
//! match the WebSocket transport.

use futures_util::stream;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, StatusCode};
use std::sync::Arc;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Upload chunk size; progress is reported once per chunk.
const UPLOAD_CHUNK: usize = 32 * 1024;

/// Default download cap, matching the relay's default blob size limit.
pub const DEFAULT_MAX_DOWNLOAD: u64 = 512 * 1024 * 1024;

/// Most memory reserved up front from an advertised content length.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// Progress callback, called with a fraction between 0.0 and 1.0.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Blob transfer errors.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The relay has no blob with this hash.
    #[error("blob not found: {hash}")]
    NotFound {
        /// Requested content hash.
        hash: String,
    },

    /// The relay answered with an unexpected status.
    #[error("relay returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (usually a JSON error).
        body: String,
    },

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The blob exceeds the client's download limit.
    #[error("blob larger than {limit} bytes")]
    TooLarge {
        /// Download limit in bytes.
        limit: u64,
    },

    /// Local file error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client for `/check`, `/upload` and `/download`.
#[derive(Debug, Clone)]
pub struct BlobClient {
    base_url: String,
    http: reqwest::Client,
    max_download: u64,
}

impl BlobClient {
    /// Create a client for a relay's HTTP base URL (`https://host:port`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            max_download: DEFAULT_MAX_DOWNLOAD,
        })
    }

    /// Set the largest blob `download` will accept.
    pub fn with_max_download(mut self, limit: u64) -> Self {
        self.max_download = limit;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str, hash: &str) -> String {
        format!("{}/{}?hash={}", self.base_url, endpoint, hash)
    }

    /// Whether the relay already stores a blob.
    pub async fn exists(&self, hash: &str) -> Result<bool, TransferError> {
        let response = self.http.get(self.endpoint_url("check", hash)).send().await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error(status, response).await),
        }
    }

    /// Upload an encrypted blob under its content hash.
    ///
    /// Progress is reported as each chunk is handed to the connection.
    pub async fn upload(
        &self,
        hash: &str,
        data: Vec<u8>,
        progress: ProgressFn,
    ) -> Result<(), TransferError> {
        let total = data.len();
        if total == 0 {
            progress(1.0);
        }

        let chunks: Vec<Vec<u8>> = data.chunks(UPLOAD_CHUNK).map(<[u8]>::to_vec).collect();
        let mut sent = 0usize;
        let body = stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len();
            progress(sent as f64 / total as f64);
            Ok::<_, std::io::Error>(chunk)
        }));

        let response = self
            .http
            .post(self.endpoint_url("upload", hash))
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), response).await);
        }

        tracing::debug!("Uploaded blob {} ({} bytes)", hash, total);
        Ok(())
    }

    /// Download a blob.
    ///
    /// Progress is reported per received chunk when the relay sends a
    /// content length. Blobs over the download limit fail with
    /// [`TransferError::TooLarge`], whatever length the relay advertises.
    pub async fn download(
        &self,
        hash: &str,
        progress: ProgressFn,
    ) -> Result<Vec<u8>, TransferError> {
        let mut response = self
            .http
            .get(self.endpoint_url("download", hash))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransferError::NotFound {
                hash: hash.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(status_error(response.status(), response).await);
        }

        let limit = self.max_download;
        let total = response.content_length().unwrap_or(0);
        if total > limit {
            return Err(TransferError::TooLarge { limit });
        }

        let mut data = Vec::with_capacity(total.min(MAX_PREALLOC) as usize);
        while let Some(chunk) = response.chunk().await? {
            if (data.len() + chunk.len()) as u64 > limit {
                return Err(TransferError::TooLarge { limit });
            }
            data.extend_from_slice(&chunk);
            if total > 0 {
                progress(data.len() as f64 / total as f64);
            }
        }

        tracing::debug!("Downloaded blob {} ({} bytes)", hash, data.len());
        Ok(data)
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> TransferError {
    let body = response.text().await.unwrap_or_default();
    TransferError::Status {
        status: status.as_u16(),
        body,
    }
}
