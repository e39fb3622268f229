//! Local mirror of decrypted chat history.
//!
//! Rows are keyed by the relay-assigned id, so replaying the same frame
//! (backfill racing a broadcast, or a reconnect) never duplicates anything.
//! The highest stored id is what the client reports in `SYNC:<lastID>`.

use chat_types::{ChatEvent, EventKind};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Mirror errors.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database path error.
    #[error("invalid database path: {0}")]
    InvalidPath(String),
}

/// Columns older mirrors may lack; added on open.
const ADDED_COLUMNS: &[&str] = &["kind", "avatar_hash"];

/// SQLite-backed store of decrypted events.
#[derive(Clone)]
pub struct LocalMirror {
    pool: SqlitePool,
}

impl std::fmt::Debug for LocalMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMirror").finish_non_exhaustive()
    }
}

impl LocalMirror {
    /// Open (or create) the mirror at a database path.
    pub async fn open(path: &Path) -> Result<Self, MirrorError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| MirrorError::InvalidPath(path.display().to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MirrorError::InvalidPath(format!("{}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let mirror = Self { pool };
        mirror.run_migrations().await?;
        Ok(mirror)
    }

    /// Create an in-memory mirror (for testing).
    pub async fn in_memory() -> Result<Self, MirrorError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let mirror = Self { pool };
        mirror.run_migrations().await?;
        Ok(mirror)
    }

    /// Create the table and add any columns an older mirror lacks.
    async fn run_migrations(&self) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_log (
                id INTEGER PRIMARY KEY,
                sender TEXT NOT NULL DEFAULT '',
                body TEXT,
                sent_at TEXT NOT NULL DEFAULT '',
                file_hash TEXT,
                file_name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for column in ADDED_COLUMNS {
            let present: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM pragma_table_info('chat_log') WHERE name = ?1",
            )
            .bind(*column)
            .fetch_one(&self.pool)
            .await?;

            if present == 0 {
                tracing::debug!("Adding column {} to local mirror", column);
                // Column names come from the constant list above, never from input.
                sqlx::query(&format!(
                    "ALTER TABLE chat_log ADD COLUMN {} TEXT DEFAULT ''",
                    column
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Insert an event under its id. Returns `false` if the id was already
    /// present (the stored row is left untouched).
    pub async fn insert(&self, event: &ChatEvent) -> Result<bool, MirrorError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO chat_log
                (id, sender, body, sent_at, file_hash, file_name, kind, avatar_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(i64::from(event.id))
        .bind(&event.sender)
        .bind(&event.text)
        .bind(&event.sent_at)
        .bind(&event.file_hash)
        .bind(&event.file_name)
        .bind(event.kind.as_str())
        .bind(event.avatar_hash.as_deref().unwrap_or(""))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Highest stored id, or 0 for an empty mirror.
    pub async fn last_id(&self) -> Result<u32, MirrorError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM chat_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(id.and_then(|id| u32::try_from(id).ok()).unwrap_or(0))
    }

    /// All stored events in ascending id order.
    pub async fn history(&self) -> Result<Vec<ChatEvent>, MirrorError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, sender, body, sent_at, file_hash, file_name, kind, avatar_hash
            FROM chat_log
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChatEvent::from).collect())
    }

    /// Number of stored events.
    pub async fn len(&self) -> Result<u64, MirrorError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Whether the mirror holds no events.
    pub async fn is_empty(&self) -> Result<bool, MirrorError> {
        Ok(self.len().await? == 0)
    }
}

/// Database row representation.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    sender: String,
    body: Option<String>,
    sent_at: String,
    file_hash: Option<String>,
    file_name: Option<String>,
    kind: Option<String>,
    avatar_hash: Option<String>,
}

impl From<EventRow> for ChatEvent {
    fn from(row: EventRow) -> Self {
        // Rows written before `kind` existed are text messages.
        let kind = row
            .kind
            .as_deref()
            .and_then(EventKind::parse)
            .unwrap_or(EventKind::Text);

        ChatEvent {
            id: u32::try_from(row.id).unwrap_or(0),
            kind,
            sender: row.sender,
            text: row.body,
            file_hash: row.file_hash,
            file_name: row.file_name,
            sent_at: row.sent_at,
            avatar_hash: row.avatar_hash.filter(|h| !h.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u32, body: &str) -> ChatEvent {
        let mut e = ChatEvent::text("alice#a1b2c3", body);
        e.id = id;
        e
    }

    #[tokio::test]
    async fn empty_mirror() {
        let mirror = LocalMirror::in_memory().await.unwrap();
        assert_eq!(mirror.last_id().await.unwrap(), 0);
        assert!(mirror.is_empty().await.unwrap());
        assert!(mirror.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let mirror = LocalMirror::in_memory().await.unwrap();

        assert!(mirror.insert(&event(1, "hello")).await.unwrap());
        assert!(!mirror.insert(&event(1, "hello")).await.unwrap());
        // A different payload under the same id does not overwrite
        assert!(!mirror.insert(&event(1, "rewritten")).await.unwrap());

        let history = mirror.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn history_is_ascending_regardless_of_insert_order() {
        let mirror = LocalMirror::in_memory().await.unwrap();
        for id in [3, 1, 2] {
            mirror.insert(&event(id, &format!("m{id}"))).await.unwrap();
        }

        let ids: Vec<u32> = mirror.history().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(mirror.last_id().await.unwrap(), 3);
        assert_eq!(mirror.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn file_events_roundtrip() {
        let mirror = LocalMirror::in_memory().await.unwrap();
        let mut e = ChatEvent::file("bob", "photo.jpg", "ab".repeat(32))
            .with_avatar(Some("cd".repeat(32)));
        e.id = 9;
        mirror.insert(&e).await.unwrap();

        let stored = &mirror.history().await.unwrap()[0];
        assert_eq!(stored, &e);
    }

    #[tokio::test]
    async fn old_mirror_gains_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        // A mirror from before kind/avatar_hash existed
        {
            let options = SqliteConnectOptions::from_str(path.to_str().unwrap())
                .unwrap()
                .create_if_missing(true);
            let pool = SqlitePool::connect_with(options).await.unwrap();
            sqlx::query(
                "CREATE TABLE chat_log (id INTEGER PRIMARY KEY, sender TEXT NOT NULL DEFAULT '', body TEXT, sent_at TEXT NOT NULL DEFAULT '', file_hash TEXT, file_name TEXT)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query("INSERT INTO chat_log (id, sender, body, sent_at) VALUES (4, 'carol', 'old', '08:00')")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let mirror = LocalMirror::open(&path).await.unwrap();
        let history = mirror.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EventKind::Text);
        assert!(history[0].avatar_hash.is_none());
        assert_eq!(mirror.last_id().await.unwrap(), 4);

        assert!(mirror.insert(&event(5, "new")).await.unwrap());
    }

    #[tokio::test]
    async fn mirror_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("mirror.db");

        {
            let mirror = LocalMirror::open(&path).await.unwrap();
            mirror.insert(&event(7, "persisted")).await.unwrap();
        }

        let mirror = LocalMirror::open(&path).await.unwrap();
        assert_eq!(mirror.last_id().await.unwrap(), 7);
    }
}
