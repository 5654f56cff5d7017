//! Redb storage backend.
//!
//! Implements the [`StorageEngine`](crate::StorageEngine) traits on top of
//! redb, a pure-Rust embedded database with ACID transactions: a single
//! writer at a time, any number of readers on MVCC snapshots, and a file
//! that grows as needed.
//!
//! Redb wants statically-typed tables, while the index layers above work
//! with dynamically named sub-stores. The backend therefore multiplexes all
//! logical sub-stores onto one physical table by prefixing every key with
//! `<table name> 0x00` (see [`tables`]).

mod engine;
pub mod tables;
mod transaction;

pub use engine::{RedbConfig, RedbEngine};
pub use transaction::{RedbCursor, RedbTransaction};
