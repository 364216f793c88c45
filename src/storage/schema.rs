use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the feed store. Cheap to clone; clones share the pool and the
/// writer lock.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Pre-create the database file user-only so it never exists
        // with default umask permissions
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                // If creation fails, SQLite reports the real error at connect time
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for a competing writer before SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database lives in shared cache across pool connections, where
        // table locks bypass busy_timeout. One connection avoids SQLITE_LOCKED in tests.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Other(e) => DatabaseError::Migration(e.to_string()),
            locked => locked,
        })?;
        Ok(db)
    }

    /// Acquire the single-writer lock.
    ///
    /// Every read-merge-write sequence against a feed graph (load, parse,
    /// reconcile, commit) and every delete runs while holding this guard, so
    /// two refresh tasks never interleave their writes. Network I/O must
    /// happen before the guard is taken.
    pub async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id BLOB PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                last_fetched INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id BLOB PRIMARY KEY,
                feed_id BLOB NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                link TEXT NOT NULL DEFAULT '',
                published INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Item list for a feed, newest first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_feed_published ON items(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // At most one item per non-empty link within a feed
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_feed_link \
             ON items(feed_id, link) WHERE link <> ''",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
