//! Error types for the cache store.
//!
//! Only store-open failures are fatal. Everything downstream of an open
//! store absorbs per-file failures and logs them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file exists but cannot be opened or initialised.
    #[error("cache database at {path:?} is unreadable or corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The database was written by a newer build than this one.
    #[error("cache schema version {found} is newer than supported version {supported}; update the application")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
