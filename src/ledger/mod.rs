//! Dedup ledger: durable record of what already succeeded or failed.
//!
//! The ledger answers one question before any network work happens: has
//! this id already been handled? It is backed by two `SQLite` tables
//! (`downloads` and `failed_downloads`) which may live in the same file or
//! in separate files. Either table can be disabled, in which case it behaves
//! as an always-empty store that silently accepts writes.
//!
//! # Example
//!
//! ```ignore
//! use ripper_core::ledger::Ledger;
//! use ripper_core::{MediaType, Provider};
//!
//! let ledger = Ledger::in_memory().await?;
//! ledger.record_success("123").await?;
//! assert!(ledger.contains("123").await?);
//!
//! ledger
//!     .record_failure(Provider::Qobuz, MediaType::Track, "9", "not streamable")
//!     .await?;
//! assert!(ledger.contains_failed(Provider::Qobuz, MediaType::Track, "9").await?);
//! ```

mod error;

use std::path::Path;

pub use error::LedgerError;
use sqlx::FromRow;
use tracing::{debug, instrument};

use crate::config::DatabaseConfig;
use crate::db::Database;
use crate::media::{MediaType, Provider};

/// A permanently failed item as stored in `failed_downloads`.
#[derive(Debug, Clone, FromRow)]
pub struct FailedRecord {
    pub source: String,
    pub media_type: String,
    pub id: String,
    pub reason: Option<String>,
    pub recorded_at: String,
}

/// Persistent set of succeeded ids and permanently failed items.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    downloads: Option<Database>,
    failed: Option<Database>,
}

impl Ledger {
    /// Opens the ledger files named in the database configuration.
    ///
    /// When both tables point at the same file it is opened once and shared.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] if a database cannot be opened or
    /// migrated, or [`LedgerError::Directory`] if its parent directory cannot
    /// be created.
    #[instrument(skip(config))]
    pub async fn open(config: &DatabaseConfig) -> Result<Self, LedgerError> {
        let downloads = if config.downloads_enabled {
            Some(open_file(&config.downloads_path).await?)
        } else {
            None
        };

        let failed = if !config.failed_downloads_enabled {
            None
        } else if let Some(shared) = downloads
            .as_ref()
            .filter(|_| config.failed_downloads_path == config.downloads_path)
        {
            Some(shared.clone())
        } else {
            Some(open_file(&config.failed_downloads_path).await?)
        };

        debug!(
            downloads = downloads.is_some(),
            failed = failed.is_some(),
            "ledger opened"
        );
        Ok(Self { downloads, failed })
    }

    /// Creates a ledger over wrapped database handles.
    #[must_use]
    pub fn from_databases(downloads: Option<Database>, failed: Option<Database>) -> Self {
        Self { downloads, failed }
    }

    /// In-memory ledger with both tables enabled.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] if the in-memory database cannot be
    /// created.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let db = Database::new_in_memory()
            .await
            .map_err(|source| LedgerError::Open {
                path: ":memory:".into(),
                source,
            })?;
        Ok(Self {
            downloads: Some(db.clone()),
            failed: Some(db),
        })
    }

    /// Ledger that remembers nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns true if `id` has a succeeded record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the query fails.
    #[instrument(skip(self))]
    pub async fn contains(&self, id: &str) -> Result<bool, LedgerError> {
        let Some(db) = &self.downloads else {
            return Ok(false);
        };
        let found: Option<(String,)> = sqlx::query_as("SELECT id FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await?;
        Ok(found.is_some())
    }

    /// Returns true if the item has a permanently failed record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the query fails.
    #[instrument(skip(self))]
    pub async fn contains_failed(
        &self,
        provider: Provider,
        media_type: MediaType,
        id: &str,
    ) -> Result<bool, LedgerError> {
        let Some(db) = &self.failed else {
            return Ok(false);
        };
        let found: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM failed_downloads WHERE source = ? AND media_type = ? AND id = ?",
        )
        .bind(provider.as_str())
        .bind(media_type.as_str())
        .bind(id)
        .fetch_optional(db.pool())
        .await?;
        Ok(found.is_some())
    }

    /// Records `id` as succeeded. Recording twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn record_success(&self, id: &str) -> Result<(), LedgerError> {
        let Some(db) = &self.downloads else {
            return Ok(());
        };
        sqlx::query("INSERT OR IGNORE INTO downloads (id) VALUES (?)")
            .bind(id)
            .execute(db.pool())
            .await?;
        Ok(())
    }

    /// Records a permanent failure. Recording twice keeps the first reason.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the insert fails.
    #[instrument(skip(self, reason))]
    pub async fn record_failure(
        &self,
        provider: Provider,
        media_type: MediaType,
        id: &str,
        reason: &str,
    ) -> Result<(), LedgerError> {
        let Some(db) = &self.failed else {
            return Ok(());
        };
        sqlx::query(
            "INSERT OR IGNORE INTO failed_downloads (source, media_type, id, reason) VALUES (?, ?, ?, ?)",
        )
        .bind(provider.as_str())
        .bind(media_type.as_str())
        .bind(id)
        .bind(reason)
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Lists failed records, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the query fails.
    #[instrument(skip(self))]
    pub async fn failures(&self) -> Result<Vec<FailedRecord>, LedgerError> {
        let Some(db) = &self.failed else {
            return Ok(Vec::new());
        };
        let records = sqlx::query_as::<_, FailedRecord>(
            r"SELECT source, media_type, id, reason, recorded_at
              FROM failed_downloads
              ORDER BY recorded_at DESC, rowid DESC",
        )
        .fetch_all(db.pool())
        .await?;
        Ok(records)
    }

    /// Closes the underlying pools.
    pub async fn close(self) {
        if let Some(db) = self.downloads {
            db.close().await;
        }
        if let Some(db) = self.failed {
            db.close().await;
        }
    }
}

async fn open_file(path: &Path) -> Result<Database, LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| LedgerError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Database::new(path)
        .await
        .map_err(|source| LedgerError::Open {
            path: path.to_path_buf(),
            source,
        })
}
