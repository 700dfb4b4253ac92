//! Ledger failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file could not be opened or migrated.
    #[error("cannot open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: DbError,
    },

    #[error("cannot create ledger directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A lookup or insert failed on an open ledger.
    #[error("ledger query failed: {0}")]
    Query(#[from] sqlx::Error),
}

impl LedgerError {
    /// Another process holds the file lock past the busy timeout.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        match self {
            Self::Query(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("5" | "6"))
                    || db.message().contains("database is locked")
            }
            _ => false,
        }
    }
}
