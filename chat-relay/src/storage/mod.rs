//! Message log for chat-relay.
//!
//! An append-only, durable log of opaque ciphertexts. Ids are assigned by
//! the log, strictly increasing, and never reused.

mod sqlite;

pub use sqlite::SqliteLog;

use crate::error::StorageError;
use async_trait::async_trait;

/// A ciphertext stored in the relay log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Relay-assigned position.
    pub id: u32,
    /// Encrypted payload (relay cannot decrypt).
    pub ciphertext: Vec<u8>,
    /// Unix timestamp when the relay accepted it.
    pub received_at: i64,
}

/// Trait for message log backends.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a ciphertext and assign it the next id.
    async fn append(&self, ciphertext: &[u8]) -> Result<u32, StorageError>;

    /// Get entries with id greater than `after`, ascending.
    ///
    /// Returns up to `limit` entries.
    async fn entries_after(&self, after: u32, limit: u32) -> Result<Vec<LogEntry>, StorageError>;

    /// Highest assigned id, or 0 for an empty log.
    async fn max_id(&self) -> Result<u32, StorageError>;

    /// Number of stored entries.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Total ciphertext bytes stored.
    async fn total_bytes(&self) -> Result<u64, StorageError>;
}
