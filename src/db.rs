//! SQLite storage behind the download ledger.
//!
//! Each ledger file is opened through [`Database::new`], which creates it on
//! first use, switches it to WAL so many rip tasks can look up and append ids
//! at the same time, and applies the bundled migrations.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// SQLite locks the whole file on write, more connections only queue.
const POOL_SIZE: u32 = 4;

/// How long a writer waits on a locked file before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("ledger schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// A migrated ledger file.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the ledger file at `path`.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the file cannot be opened as SQLite,
    /// [`DbError::Migration`] when the schema cannot be applied.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn new(path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    /// A private ledger that vanishes with the process.
    ///
    /// The pool holds a single connection: every `:memory:` connection would
    /// otherwise see its own empty database.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("ledger schema up to date");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// # Errors
    ///
    /// [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Waits for in-flight queries and closes every connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn insert_failure(db: &Database, source: &str, media_type: &str) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO failed_downloads (source, media_type, id) VALUES (?, ?, '1')")
            .bind(source)
            .bind(media_type)
            .execute(db.pool())
            .await
            .map(|_| ())
    }

    // ==================== Schema Tests ====================

    #[tokio::test]
    async fn test_succeeded_ids_are_unique() {
        let db = Database::new_in_memory().await.unwrap();
        let insert = "INSERT INTO downloads (id) VALUES ('19512574')";

        sqlx::query(insert).execute(db.pool()).await.unwrap();
        let again = sqlx::query(insert).execute(db.pool()).await;

        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_failed_rows_accept_known_providers_only() {
        let db = Database::new_in_memory().await.unwrap();

        assert!(insert_failure(&db, "tidal", "album").await.is_ok());
        assert!(insert_failure(&db, "napster", "track").await.is_err());
        assert!(insert_failure(&db, "qobuz", "podcast").await.is_err());
    }

    #[tokio::test]
    async fn test_recorded_at_defaults_to_now() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO downloads (id) VALUES ('1')")
            .execute(db.pool())
            .await
            .unwrap();

        let (recorded_at,): (String,) =
            sqlx::query_as("SELECT recorded_at FROM downloads WHERE id = '1'")
                .fetch_one(db.pool())
                .await
                .unwrap();

        assert_eq!(recorded_at.len(), "2026-01-01 00:00:00".len());
    }

    // ==================== File Tests ====================

    #[tokio::test]
    async fn test_file_database_uses_wal_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.db");

        let db = Database::new(&path).await.unwrap();
        assert!(db.is_wal_enabled().await.unwrap());
        sqlx::query("INSERT INTO downloads (id) VALUES ('a')")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        let reopened = Database::new(&path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM downloads")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
