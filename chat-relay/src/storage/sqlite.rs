//! SQLite storage backend for chat-relay.

use super::{LogEntry, MessageLog};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based message log.
///
/// Uses WAL mode for concurrent reads/writes. `AUTOINCREMENT` keeps ids
/// from ever being reused, even after the highest row is gone.
#[derive(Clone)]
pub struct SqliteLog {
    pool: SqlitePool,
}

impl SqliteLog {
    /// Open (or create) the log at a database path.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::InvalidPath {
                path: path.to_path_buf(),
            })?;
        }

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let log = Self { pool };
        log.run_migrations().await?;
        Ok(log)
    }

    /// Create an in-memory log (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection that is never recycled: each new connection
        // would open a fresh, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let log = Self { pool };
        log.run_migrations().await?;
        Ok(log)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data BLOB NOT NULL,
                received_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageLog for SqliteLog {
    async fn append(&self, ciphertext: &[u8]) -> Result<u32, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (data, received_at)
            VALUES (?1, ?2)
            RETURNING id
            "#,
        )
        .bind(ciphertext)
        .bind(Self::current_timestamp())
        .fetch_one(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        // Frames carry a 32-bit id; refuse to store what cannot be addressed.
        let id = match u32::try_from(id) {
            Ok(id) => id,
            Err(_) => {
                tx.rollback().await.map_err(StorageError::Database)?;
                return Err(StorageError::IdSpaceExhausted(id));
            }
        };

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(id)
    }

    async fn entries_after(&self, after: u32, limit: u32) -> Result<Vec<LogEntry>, StorageError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, data, received_at
            FROM messages
            WHERE id > ?1
            ORDER BY id ASC
            LIMIT ?2
            "#,
        )
        .bind(i64::from(after))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn max_id(&self) -> Result<u32, StorageError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        let id = id.unwrap_or(0);
        u32::try_from(id).map_err(|_| StorageError::IdSpaceExhausted(id))
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }

    async fn total_bytes(&self) -> Result<u64, StorageError> {
        let total: Option<i64> = sqlx::query_scalar("SELECT SUM(LENGTH(data)) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(total.unwrap_or(0) as u64)
    }
}

/// Database row representation.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    data: Vec<u8>,
    received_at: i64,
}

impl TryFrom<MessageRow> for LogEntry {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = u32::try_from(row.id).map_err(|_| StorageError::IdSpaceExhausted(row.id))?;
        Ok(LogEntry {
            id,
            ciphertext: row.data,
            received_at: row.received_at,
        })
    }
}
