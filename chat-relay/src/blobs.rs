//! Content-addressed blob store.
//!
//! Blobs live as flat files named by their hex BLAKE3 hash. Uploads are
//! streamed into `.partial/` and hard-linked into place, so a reader never
//! sees a half-written blob and the first complete upload of a hash wins.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::BlobError;

/// Length of a hex-encoded BLAKE3 digest.
pub const HASH_HEX_LEN: usize = 64;

const PARTIAL_DIR: &str = ".partial";

/// Outcome of a [`BlobStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Bytes were written under the hash.
    Stored {
        /// Blob size.
        bytes: u64,
    },
    /// The hash was already present; nothing was written.
    AlreadyPresent,
}

/// Content-addressed blob storage on the local filesystem.
#[derive(Debug)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: u64,
    next_partial: AtomicU64,
}

impl BlobStore {
    /// Open the store, creating the directory if needed.
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, BlobError> {
        fs::create_dir_all(base_path.join(PARTIAL_DIR))
            .await
            .map_err(|e| {
                BlobError::Storage(format!(
                    "failed to create blob directory '{}': {}",
                    base_path.display(),
                    e
                ))
            })?;

        info!(path = %base_path.display(), max_size, "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
            next_partial: AtomicU64::new(0),
        })
    }

    /// Directory holding the blobs.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Largest blob accepted by [`put`](Self::put).
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Check that `hash` is 64 lowercase hex characters.
    ///
    /// This is also what keeps blob paths inside the store: a valid hash
    /// contains no separators or dots.
    pub fn validate_hash(hash: &str) -> Result<(), BlobError> {
        let valid = hash.len() == HASH_HEX_LEN
            && hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(())
        } else {
            Err(BlobError::InvalidHash(hash.to_string()))
        }
    }

    /// Whether a blob is stored under `hash`.
    pub async fn exists(&self, hash: &str) -> Result<bool, BlobError> {
        let path = self.blob_path(hash)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| BlobError::Storage(format!("failed to stat blob {}: {}", hash, e)))
    }

    /// Store a streamed body under `hash` unless it is already present.
    ///
    /// The body must hash to `hash` and stay within the size limit; on any
    /// failure the partial file is removed and nothing becomes visible.
    pub async fn put<S, E>(&self, hash: &str, mut body: S) -> Result<PutOutcome, BlobError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let target = self.blob_path(hash)?;
        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!(hash, "Blob already present, skipping write");
            return Ok(PutOutcome::AlreadyPresent);
        }

        let partial = self.partial_path(hash);
        let result = self.write_partial(hash, &partial, &mut body).await;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        // hard_link fails if the target exists: atomic create-if-absent.
        let outcome = match fs::hard_link(&partial, &target).await {
            Ok(()) => PutOutcome::Stored { bytes },
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => PutOutcome::AlreadyPresent,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(BlobError::Storage(format!(
                    "failed to publish blob {}: {}",
                    hash, e
                )));
            }
        };
        let _ = fs::remove_file(&partial).await;

        debug!(hash, ?outcome, "Blob upload finished");
        Ok(outcome)
    }

    /// Open a stored blob for reading. Returns the file and its size.
    pub async fn open(&self, hash: &str) -> Result<(fs::File, u64), BlobError> {
        let path = self.blob_path(hash)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound {
                    hash: hash.to_string(),
                })
            }
            Err(e) => {
                return Err(BlobError::Storage(format!(
                    "failed to open blob {}: {}",
                    hash, e
                )))
            }
        };

        let len = file
            .metadata()
            .await
            .map_err(|e| BlobError::Storage(format!("failed to stat blob {}: {}", hash, e)))?
            .len();

        Ok((file, len))
    }

    async fn write_partial<S, E>(
        &self,
        hash: &str,
        partial: &Path,
        body: &mut S,
    ) -> Result<u64, BlobError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut file = fs::File::create(partial)
            .await
            .map_err(|e| BlobError::Storage(format!("failed to create partial blob: {}", e)))?;

        let mut hasher = blake3::Hasher::new();
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| BlobError::Storage(format!("upload interrupted: {}", e)))?;

            written += chunk.len() as u64;
            if written > self.max_size {
                return Err(BlobError::TooLarge {
                    limit: self.max_size,
                });
            }

            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| BlobError::Storage(format!("failed to write blob: {}", e)))?;
        }

        file.sync_all()
            .await
            .map_err(|e| BlobError::Storage(format!("failed to sync blob: {}", e)))?;

        let actual = hasher.finalize().to_hex().to_string();
        if actual != hash {
            return Err(BlobError::HashMismatch {
                expected: hash.to_string(),
                actual,
            });
        }

        Ok(written)
    }

    fn blob_path(&self, hash: &str) -> Result<PathBuf, BlobError> {
        Self::validate_hash(hash)?;
        Ok(self.base_path.join(hash))
    }

    fn partial_path(&self, hash: &str) -> PathBuf {
        let n = self.next_partial.fetch_add(1, Ordering::Relaxed);
        self.base_path
            .join(PARTIAL_DIR)
            .join(format!("{}.{}.{}", hash, std::process::id(), n))
    }
}
