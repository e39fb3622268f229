//! Blob transfer endpoints: `/check`, `/upload`, `/download`.
//!
//! All three take the content hash as a `hash` query parameter. Bodies are
//! streamed in both directions; the relay never buffers a whole blob.

use crate::blobs::PutOutcome;
use crate::error::BlobError;
use crate::server::{ChatRelay, RelayMetrics};
use axum::body::{Body, Bytes};
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// `?hash=<hex>` query.
#[derive(Debug, Deserialize)]
pub struct HashQuery {
    /// Content hash of the blob.
    pub hash: String,
}

/// Existence probe: 200 if stored, 404 if not.
pub async fn check_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    Query(q): Query<HashQuery>,
) -> Result<StatusCode, BlobError> {
    if relay.blobs().exists(&q.hash).await? {
        Ok(StatusCode::OK)
    } else {
        Err(BlobError::NotFound { hash: q.hash })
    }
}

/// Store the request body under the hash unless already present.
pub async fn upload_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    Query(q): Query<HashQuery>,
    body: Body,
) -> Result<StatusCode, BlobError> {
    let result = relay.blobs().put(&q.hash, body.into_data_stream()).await;

    match result {
        Ok(PutOutcome::Stored { bytes }) => {
            RelayMetrics::incr(&relay.metrics().blob_uploads);
            tracing::info!(hash = %q.hash, bytes, "Blob stored");
            Ok(StatusCode::OK)
        }
        Ok(PutOutcome::AlreadyPresent) => {
            RelayMetrics::incr(&relay.metrics().blob_dedup_hits);
            Ok(StatusCode::OK)
        }
        Err(e) => {
            if matches!(e, BlobError::Storage(_)) {
                tracing::error!(hash = %q.hash, "Blob upload failed: {}", e);
            } else {
                tracing::warn!(hash = %q.hash, "Blob upload rejected: {}", e);
            }
            Err(e)
        }
    }
}

/// Stream a stored blob back verbatim.
pub async fn download_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    Query(q): Query<HashQuery>,
) -> Result<Response, BlobError> {
    let (file, len) = relay.blobs().open(&q.hash).await?;

    let chunks = futures_util::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(chunks),
    )
        .into_response())
}
