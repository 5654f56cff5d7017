//! `LatticeDB` Storage
//!
//! This crate provides the transactional key-value substrate that the index
//! layers build on, plus the write-ahead log for document-id lifecycle
//! events.
//!
//! # Overview
//!
//! The storage layer exposes a small trait surface that backends implement:
//!
//! - [`StorageEngine`] - entry point; hands out transactions
//! - [`Transaction`] - snapshot reads and atomic writes over named sub-stores
//! - [`Cursor`] - ordered iteration with seek/next/prev
//!
//! The shipped backend is [`backends::RedbEngine`], built on redb: a
//! pure-Rust embedded store with single-writer / multi-reader MVCC
//! transactions and an auto-growing file. Logical sub-store names are
//! multiplexed onto one physical table by key prefixing, so callers work
//! with plain `&str` table names.
//!
//! # Example
//!
//! ```ignore
//! use latticedb_storage::{StorageEngine, Transaction};
//! use latticedb_storage::backends::RedbEngine;
//!
//! let engine = RedbEngine::in_memory()?;
//!
//! let mut tx = engine.begin_write()?;
//! tx.put("docs", b"doc:1", b"payload")?;
//! tx.commit()?;
//!
//! let tx = engine.begin_read()?;
//! assert_eq!(tx.get("docs", b"doc:1")?, Some(b"payload".to_vec()));
//! ```
//!
//! # Modules
//!
//! - [`engine`] - storage traits and error types
//! - [`backends`] - backend implementations
//! - [`wal`] - append-only log of id lifecycle records

pub mod backends;
pub mod engine;
pub mod wal;

pub use engine::{Cursor, CursorResult, KeyValue, StorageEngine, StorageError, StorageResult, Transaction};
pub use wal::{IdWal, WalOp, WalRecord};
