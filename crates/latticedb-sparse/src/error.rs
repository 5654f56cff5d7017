//! Error types for the sparse retrieval crate.

use thiserror::Error;

use crate::filter::FieldType;

/// Errors that can occur in index and search operations.
#[derive(Debug, Error)]
pub enum SparseError {
    /// A persisted record whose length disagrees with its declared count, or
    /// an otherwise malformed blob. Never silently repaired.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A filter write used a different type than the field's registered one.
    /// The write for that field is skipped; the batch continues.
    #[error("type conflict on field '{field}': registered {registered:?}, got {attempted:?}")]
    TypeConflict {
        /// The field whose type is already fixed.
        field: String,
        /// The type registered on first observation.
        registered: FieldType,
        /// The conflicting type of the incoming write.
        attempted: FieldType,
    },

    /// A `$range` with reversed bounds.
    #[error("invalid range: start > end")]
    RangeOverflow,

    /// A malformed filter expression (empty field name, unknown operator,
    /// operator/type mismatch).
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Storage backend error; transient variants are retried by the caller
    /// after the store grows.
    #[error("storage error: {0}")]
    Storage(#[from] latticedb_storage::StorageError),

    /// Core type or codec error.
    #[error(transparent)]
    Core(#[from] latticedb_core::CoreError),

    /// Lock poisoned by a panic in another thread. Unrecoverable: the index
    /// must be reopened.
    #[error("index corrupted: lock poisoned due to prior panic in another thread")]
    LockPoisoned,

    /// Internal consistency violation. Indicates a bug, not a caller error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for sparse index operations.
pub type SparseResult<T> = Result<T, SparseError>;
