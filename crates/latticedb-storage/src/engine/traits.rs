//! Core storage engine traits.

use std::ops::Bound;

use super::StorageError;

/// An owned key-value pair returned by cursors.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Result of positioning a cursor: the entry it landed on, if any.
pub type CursorResult = Result<Option<KeyValue>, StorageError>;

/// A storage engine providing transactional key-value operations over
/// named sub-stores.
pub trait StorageEngine: Send + Sync {
    /// The transaction type for this engine.
    type Transaction<'a>: Transaction
    where
        Self: 'a;

    /// Begin a read-only transaction pinned to a consistent snapshot.
    fn begin_read(&self) -> Result<Self::Transaction<'_>, StorageError>;

    /// Begin a read-write transaction. Writers are serialized by the engine.
    fn begin_write(&self) -> Result<Self::Transaction<'_>, StorageError>;
}

/// A transaction over named sub-stores.
///
/// Reads observe the snapshot taken when the transaction began. Writes are
/// buffered and become visible atomically on [`commit`](Transaction::commit).
pub trait Transaction {
    /// The cursor type for ordered iteration.
    type Cursor<'a>: Cursor
    where
        Self: 'a;

    /// Get a value by key from a sub-store.
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a key-value pair into a sub-store (upsert).
    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key from a sub-store. Returns whether the key existed.
    fn delete(&mut self, table: &str, key: &[u8]) -> Result<bool, StorageError>;

    /// Create a cursor over the full key range of a sub-store.
    fn cursor(&self, table: &str) -> Result<Self::Cursor<'_>, StorageError>;

    /// Create a cursor restricted to a key range of a sub-store.
    fn range(
        &self,
        table: &str,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
    ) -> Result<Self::Cursor<'_>, StorageError>;

    /// Commit the transaction, making all writes durable and visible.
    fn commit(self) -> Result<(), StorageError>;

    /// Roll the transaction back, discarding all writes.
    fn rollback(self) -> Result<(), StorageError>;

    /// Whether this transaction is read-only.
    fn is_read_only(&self) -> bool;
}

/// A cursor over the ordered keys of one sub-store.
///
/// Cursors start unpositioned; call [`seek`](Cursor::seek),
/// [`seek_first`](Cursor::seek_first) or [`seek_last`](Cursor::seek_last)
/// to position them, then step with [`next`](Cursor::next) /
/// [`prev`](Cursor::prev).
pub trait Cursor {
    /// Position at the first entry whose key is `>=` the given key.
    fn seek(&mut self, key: &[u8]) -> CursorResult;

    /// Position at the first entry of the range.
    fn seek_first(&mut self) -> CursorResult;

    /// Position at the last entry of the range.
    fn seek_last(&mut self) -> CursorResult;

    /// Step forward. An unpositioned cursor steps to the first entry.
    fn next(&mut self) -> CursorResult;

    /// Step backward. An unpositioned cursor steps to the last entry.
    fn prev(&mut self) -> CursorResult;

    /// The entry the cursor is positioned on, without moving.
    fn current(&self) -> Option<(&[u8], &[u8])>;
}
