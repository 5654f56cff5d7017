//! Redb transaction and cursor implementation.
//!
//! Cursors stream entries in bounded batches instead of materializing whole
//! sub-stores: a cursor holds at most `BATCH_SIZE` entries and refetches on
//! demand as it advances, anchored just past the edge of the previous batch.

use std::ops::Bound;

use redb::{ReadableTable, TableError};

use crate::engine::{Cursor, CursorResult, KeyValue, StorageError, Transaction};

use super::tables::{decode_key, encode_key, table_end_key, table_start_key, DATA_TABLE};

/// Entries fetched per cursor batch.
const BATCH_SIZE: usize = 512;

/// A transaction for the redb storage engine, wrapping either a read-only
/// snapshot or the single write transaction.
#[allow(clippy::large_enum_variant)]
pub enum RedbTransaction {
    /// A read-only transaction.
    Read(redb::ReadTransaction),
    /// A read-write transaction.
    Write(redb::WriteTransaction),
}

/// Run `body` against the physical data table of either transaction kind.
///
/// A missing physical table means nothing was ever written, which reads as
/// `$missing` rather than an error.
macro_rules! with_data_table {
    ($self:expr, $missing:expr, |$t:ident| $body:expr) => {
        match $self {
            RedbTransaction::Read(tx) => match tx.open_table(DATA_TABLE) {
                Ok($t) => $body,
                Err(TableError::TableDoesNotExist(_)) => Ok($missing),
                Err(e) => Err(StorageError::Internal(e.to_string())),
            },
            RedbTransaction::Write(tx) => match tx.open_table(DATA_TABLE) {
                Ok($t) => $body,
                Err(TableError::TableDoesNotExist(_)) => Ok($missing),
                Err(e) => Err(StorageError::Internal(e.to_string())),
            },
        }
    };
}

impl Transaction for RedbTransaction {
    type Cursor<'a>
        = RedbCursor<'a>
    where
        Self: 'a;

    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let phys = encode_key(table, key);
        with_data_table!(self, None, |t| {
            match t.get(phys.as_slice()) {
                Ok(Some(value)) => Ok(Some(value.value().to_vec())),
                Ok(None) => Ok(None),
                Err(e) => Err(StorageError::Internal(e.to_string())),
            }
        })
    }

    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        match self {
            Self::Read(_) => Err(StorageError::ReadOnly),
            Self::Write(tx) => {
                let phys = encode_key(table, key);
                let mut t =
                    tx.open_table(DATA_TABLE).map_err(|e| StorageError::Internal(e.to_string()))?;
                t.insert(phys.as_slice(), value)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                Ok(())
            }
        }
    }

    fn delete(&mut self, table: &str, key: &[u8]) -> Result<bool, StorageError> {
        match self {
            Self::Read(_) => Err(StorageError::ReadOnly),
            Self::Write(tx) => {
                let phys = encode_key(table, key);
                match tx.open_table(DATA_TABLE) {
                    Ok(mut t) => match t.remove(phys.as_slice()) {
                        Ok(removed) => Ok(removed.is_some()),
                        Err(e) => Err(StorageError::Internal(e.to_string())),
                    },
                    Err(TableError::TableDoesNotExist(_)) => Ok(false),
                    Err(e) => Err(StorageError::Internal(e.to_string())),
                }
            }
        }
    }

    fn cursor(&self, table: &str) -> Result<Self::Cursor<'_>, StorageError> {
        Ok(RedbCursor::new(self, table.to_string(), Bound::Unbounded, Bound::Unbounded))
    }

    fn range(
        &self,
        table: &str,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
    ) -> Result<Self::Cursor<'_>, StorageError> {
        Ok(RedbCursor::new(self, table.to_string(), bound_to_owned(start), bound_to_owned(end)))
    }

    fn commit(self) -> Result<(), StorageError> {
        match self {
            Self::Read(_) => Ok(()),
            Self::Write(tx) => tx.commit().map_err(|e| StorageError::Transaction(e.to_string())),
        }
    }

    fn rollback(self) -> Result<(), StorageError> {
        match self {
            Self::Read(_) => Ok(()),
            Self::Write(tx) => {
                drop(tx.abort());
                Ok(())
            }
        }
    }

    fn is_read_only(&self) -> bool {
        matches!(self, Self::Read(_))
    }
}

/// Convert a borrowed bound to an owned one.
fn bound_to_owned(bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(b) => Bound::Included(b.to_vec()),
        Bound::Excluded(b) => Bound::Excluded(b.to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// The smallest physical key strictly greater than `encode_key(table, key)`.
///
/// Appending a zero byte is exact: every other key above `encode_key(table,
/// key)` is also above the extension, so a range ending (or starting) here
/// includes (or excludes) precisely the key itself.
fn just_after(table: &str, key: &[u8]) -> Vec<u8> {
    let mut phys = encode_key(table, key);
    phys.push(0x00);
    phys
}

impl RedbTransaction {
    /// Fetch up to `BATCH_SIZE` entries of a logical table, in ascending
    /// order, optionally anchored just past one edge of a previous batch.
    ///
    /// Forward fetches start strictly after `anchor`; reverse fetches end
    /// strictly before it and still return entries in ascending order.
    fn fetch_batch(
        &self,
        table: &str,
        anchor: Option<&[u8]>,
        reverse: bool,
        start_bound: &Bound<Vec<u8>>,
        end_bound: &Bound<Vec<u8>>,
    ) -> Result<Vec<KeyValue>, StorageError> {
        let lo = match (reverse, anchor) {
            (false, Some(key)) => just_after(table, key),
            _ => match start_bound {
                Bound::Included(k) => encode_key(table, k),
                Bound::Excluded(k) => just_after(table, k),
                Bound::Unbounded => table_start_key(table),
            },
        };
        let hi = match (reverse, anchor) {
            (true, Some(key)) => encode_key(table, key),
            _ => match end_bound {
                Bound::Included(k) => just_after(table, k),
                Bound::Excluded(k) => encode_key(table, k),
                Bound::Unbounded => table_end_key(table),
            },
        };
        if lo >= hi {
            return Ok(Vec::new());
        }

        with_data_table!(self, Vec::new(), |t| {
            collect_range(&t, &lo, &hi, reverse)
        })
    }
}

/// Collect one batch from a physical key range, ascending.
fn collect_range<T: ReadableTable<&'static [u8], &'static [u8]>>(
    t: &T,
    lo: &[u8],
    hi: &[u8],
    reverse: bool,
) -> Result<Vec<KeyValue>, StorageError> {
    let range = t.range(lo..hi).map_err(|e| StorageError::Internal(e.to_string()))?;
    let mut entries = Vec::with_capacity(BATCH_SIZE.min(64));

    if reverse {
        for result in range.rev().take(BATCH_SIZE) {
            let (k, v) = result.map_err(|e| StorageError::Internal(e.to_string()))?;
            if let Some((_, logical)) = decode_key(k.value()) {
                entries.push((logical.to_vec(), v.value().to_vec()));
            }
        }
        entries.reverse();
    } else {
        for result in range.take(BATCH_SIZE) {
            let (k, v) = result.map_err(|e| StorageError::Internal(e.to_string()))?;
            if let Some((_, logical)) = decode_key(k.value()) {
                entries.push((logical.to_vec(), v.value().to_vec()));
            }
        }
    }
    Ok(entries)
}

/// A batched streaming cursor over one logical table.
///
/// At any time the cursor holds at most [`BATCH_SIZE`] entries; stepping off
/// either edge of the batch fetches the adjacent batch from the transaction.
pub struct RedbCursor<'a> {
    tx: &'a RedbTransaction,
    table: String,
    start_bound: Bound<Vec<u8>>,
    end_bound: Bound<Vec<u8>>,
    /// Current batch, ascending by key.
    batch: Vec<KeyValue>,
    /// Position within the batch; `None` when unpositioned or exhausted.
    pos: Option<usize>,
    /// Whether a forward fetch past the batch may yield more entries.
    more_forward: bool,
    /// Whether a reverse fetch before the batch may yield more entries.
    more_backward: bool,
}

impl<'a> RedbCursor<'a> {
    fn new(
        tx: &'a RedbTransaction,
        table: String,
        start_bound: Bound<Vec<u8>>,
        end_bound: Bound<Vec<u8>>,
    ) -> Self {
        Self {
            tx,
            table,
            start_bound,
            end_bound,
            batch: Vec::new(),
            pos: None,
            more_forward: true,
            more_backward: true,
        }
    }

    fn fetch(&self, anchor: Option<&[u8]>, reverse: bool) -> Result<Vec<KeyValue>, StorageError> {
        self.tx.fetch_batch(&self.table, anchor, reverse, &self.start_bound, &self.end_bound)
    }

    fn entry_at(&self, pos: usize) -> Option<KeyValue> {
        self.batch.get(pos).cloned()
    }

    fn settle(&mut self, pos: Option<usize>) -> CursorResult {
        self.pos = pos;
        Ok(pos.and_then(|p| self.entry_at(p)))
    }
}

impl Cursor for RedbCursor<'_> {
    fn seek(&mut self, key: &[u8]) -> CursorResult {
        // Clamp the seek target to the range's start bound.
        let clamped = match &self.start_bound {
            Bound::Included(start) if start.as_slice() > key => Bound::Included(start.clone()),
            Bound::Excluded(start) if start.as_slice() >= key => Bound::Excluded(start.clone()),
            _ => Bound::Included(key.to_vec()),
        };
        let saved = std::mem::replace(&mut self.start_bound, clamped);
        let fetched = self.fetch(None, false);
        self.start_bound = saved;

        self.batch = fetched?;
        self.more_forward = self.batch.len() >= BATCH_SIZE;
        self.more_backward = true;

        if self.batch.is_empty() {
            self.settle(None)
        } else {
            self.settle(Some(0))
        }
    }

    fn seek_first(&mut self) -> CursorResult {
        self.batch = self.fetch(None, false)?;
        self.more_forward = self.batch.len() >= BATCH_SIZE;
        self.more_backward = false;
        if self.batch.is_empty() {
            self.settle(None)
        } else {
            self.settle(Some(0))
        }
    }

    fn seek_last(&mut self) -> CursorResult {
        self.batch = self.fetch(None, true)?;
        self.more_backward = self.batch.len() >= BATCH_SIZE;
        self.more_forward = false;
        if self.batch.is_empty() {
            self.settle(None)
        } else {
            self.settle(Some(self.batch.len() - 1))
        }
    }

    fn next(&mut self) -> CursorResult {
        let Some(pos) = self.pos else {
            return self.seek_first();
        };

        if pos + 1 < self.batch.len() {
            return self.settle(Some(pos + 1));
        }
        if !self.more_forward {
            return self.settle(None);
        }

        let anchor = self.batch.last().map(|(k, _)| k.clone());
        let next_batch = self.fetch(anchor.as_deref(), false)?;
        if next_batch.is_empty() {
            self.more_forward = false;
            return self.settle(None);
        }
        self.more_forward = next_batch.len() >= BATCH_SIZE;
        self.more_backward = true;
        self.batch = next_batch;
        self.settle(Some(0))
    }

    fn prev(&mut self) -> CursorResult {
        let Some(pos) = self.pos else {
            return self.seek_last();
        };

        if pos > 0 {
            return self.settle(Some(pos - 1));
        }
        if !self.more_backward {
            return self.settle(None);
        }

        let anchor = self.batch.first().map(|(k, _)| k.clone());
        let prev_batch = self.fetch(anchor.as_deref(), true)?;
        if prev_batch.is_empty() {
            self.more_backward = false;
            return self.settle(None);
        }
        self.more_backward = prev_batch.len() >= BATCH_SIZE;
        self.more_forward = true;
        let last = prev_batch.len() - 1;
        self.batch = prev_batch;
        self.settle(Some(last))
    }

    fn current(&self) -> Option<(&[u8], &[u8])> {
        self.pos
            .and_then(|p| self.batch.get(p))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}
