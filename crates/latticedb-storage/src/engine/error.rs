//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be opened or created.
    #[error("failed to open database: {0}")]
    Open(String),

    /// A transaction error occurred (failed to begin, commit, or rollback).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Attempted a write operation on a read-only transaction.
    #[error("cannot write in read-only transaction")]
    ReadOnly,

    /// The database is corrupted.
    #[error("database corruption detected: {0}")]
    Corruption(String),

    /// The storage file is full or a size limit was exceeded. Transient:
    /// the backing store grows its geometry and the caller retries.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred in the storage backend.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether retrying after the store grows geometry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StorageFull(_) | Self::Io(_))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
