//! Error types for the core crate.

use thiserror::Error;

/// Errors that can occur in core type and codec operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid value in a sparse vector (NaN, Infinity).
    #[error("invalid value at index {index}: {value} - {reason}")]
    InvalidValue {
        /// The position of the invalid value.
        index: usize,
        /// The invalid value.
        value: f32,
        /// The reason the value is invalid.
        reason: &'static str,
    },

    /// A duplicate term id in a sparse vector.
    #[error("duplicate term id {0} in sparse vector")]
    DuplicateTerm(u32),

    /// A sparse vector exceeds the packed-record capacity.
    #[error("sparse vector has {0} terms, packed records hold at most {max}", max = u16::MAX)]
    TooManyTerms(usize),

    /// Encoding/decoding error: a record whose length disagrees with its
    /// declared count, or otherwise malformed bytes.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
