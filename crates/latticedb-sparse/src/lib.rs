//! `LatticeDB` Sparse
//!
//! Persistent sparse-vector retrieval: a Block-Max WAND inverted index with
//! structured attribute filtering, layered on the transactional key-value
//! substrate from `latticedb-storage`.
//!
//! # Overview
//!
//! - [`SparseStore`] - the façade: insert/update/delete documents and run
//!   filtered top-K searches
//! - [`bmw`] - the Block-Max WAND index and its DAAT search
//! - [`filter`] - bitmap and bucketed-numeric filter indexes plus the
//!   `$eq` / `$in` / `$range` condition language
//! - [`store`] - id mapping, document records, orchestration
//!
//! # Example
//!
//! ```ignore
//! use latticedb_core::SparseVector;
//! use latticedb_sparse::SparseStore;
//! use latticedb_storage::backends::RedbEngine;
//! use serde_json::json;
//!
//! let store = SparseStore::open(RedbEngine::open("index.redb")?, "index.wal")?;
//!
//! store.insert(
//!     "doc-1",
//!     SparseVector::new(vec![(17, 0.8), (42, 0.3)])?,
//!     Some(json!({"category": "Billing", "price": 5})),
//! )?;
//!
//! let query = SparseVector::new(vec![(17, 1.0)])?;
//! let hits = store.search(&query, 10, Some(&json!([
//!     {"category": {"$eq": "Billing"}},
//! ])))?;
//! ```

pub mod bmw;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod store;

pub use error::{SparseError, SparseResult};
pub use store::{
    DocStore, IdMapper, InsertItem, InsertOutcome, MappedId, RecoveryReport, SearchHit,
    SparseStore,
};
