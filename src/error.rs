//! Error handling for cache operations.
//!
//! All public APIs return `Result<T, CacheError>`. The variants mirror the
//! failure modes of the two storage layers: the filesystem page store and
//! the embedded SQLite index.
//!
//! Two variants deserve special handling by callers:
//!
//! - [`CacheError::IndexBusy`] is transient lock contention on the index
//!   store. Mutating index operations run under a
//!   [`RetryPolicy`](crate::cache::RetryPolicy); callers only see this
//!   variant once retries are exhausted.
//! - [`CacheError::DuplicateKey`] is a benign concurrent-insert race. The
//!   [`Cache`](crate::cache::Cache) façade swallows it; it is surfaced from
//!   [`PageIndex::put`](crate::cache::PageIndex::put) so lower-level callers
//!   can decide for themselves.

use std::io;

use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected failure inside the embedded index store.
    #[error("index store error: {0}")]
    Index(rusqlite::Error),

    /// The index store is locked by another connection.
    ///
    /// Transient by design; surfaced only after the retry policy gives up.
    #[error("index store busy")]
    IndexBusy,

    /// Insert hit an existing (channel, page) row.
    ///
    /// A benign race: two callers fetched the same missing page
    /// concurrently. Page content for a given key is assumed immutable, so
    /// last-write-wins is safe.
    #[error("duplicate page index entry")]
    DuplicateKey,

    /// Invalid configuration or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    CacheError::IndexBusy
                }
                rusqlite::ErrorCode::ConstraintViolation => CacheError::DuplicateKey,
                _ => CacheError::Index(err),
            },
            _ => CacheError::Index(err),
        }
    }
}
