//! `LatticeDB` Core
//!
//! This crate provides the fundamental types shared by every layer of
//! `LatticeDB`: document identifiers, sparse vectors, and the byte codecs
//! that define the on-disk formats.
//!
//! # Overview
//!
//! - **Identifiers**: [`DocId`] for referencing indexed documents
//! - **Sparse vectors**: [`SparseVector`] as sorted `(term_id, value)` pairs
//! - **Codecs**: the packed sparse-vector record ([`encoding::sparse`]) and
//!   the order-preserving numeric codec ([`encoding::sortable`])
//!
//! # Example
//!
//! ```
//! use latticedb_core::SparseVector;
//!
//! let vector = SparseVector::new(vec![(100, 0.5), (10, 0.3)]).unwrap();
//! assert_eq!(vector.indices(), vec![10, 100]);
//!
//! let packed = vector.pack();
//! let restored = SparseVector::unpack(&packed).unwrap();
//! assert_eq!(restored.nnz(), 2);
//! ```
//!
//! # Modules
//!
//! - [`types`] - Core data types ([`SparseVector`], [`DocId`])
//! - [`encoding`] - On-disk codecs
//! - [`error`] - Error types ([`CoreError`])

pub mod encoding;
pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{doc_id_from_le, DocId, ScoredDoc, SparseVector, DOC_ID_BYTES};
