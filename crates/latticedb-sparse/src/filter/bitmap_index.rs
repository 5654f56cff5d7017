//! Bitmap inverted index for string and boolean filter values.
//!
//! Maps `field ':' value` to a serialized roaring bitmap of doc ids. All
//! mutations are read-modify-write on the whole bitmap; a batched add is a
//! single such cycle and therefore atomic with respect to readers.

use std::sync::Arc;

use roaring::RoaringBitmap;

use latticedb_core::DocId;
use latticedb_storage::{StorageEngine, Transaction};

use crate::encoding::keys::{filter_key, tables};
use crate::error::{SparseError, SparseResult};

/// Narrow a doc id to the bitmap domain.
#[cfg(feature = "id64")]
#[inline]
fn bitmap_id(id: DocId) -> u32 {
    debug_assert!(id <= u64::from(u32::MAX), "filter bitmaps require ids to fit 32 bits");
    id as u32
}

/// Narrow a doc id to the bitmap domain.
#[cfg(not(feature = "id64"))]
#[inline]
fn bitmap_id(id: DocId) -> u32 {
    id
}

/// Bitmap index over `(field, value)` pairs.
pub struct BitmapIndex<E> {
    engine: Arc<E>,
}

impl<E: StorageEngine> BitmapIndex<E> {
    /// Create a bitmap index on the given engine.
    #[must_use]
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    // ========================================================================
    // Transaction-scoped entry points
    // ========================================================================

    /// Load the bitmap for a key; missing keys read as an empty bitmap.
    pub fn bitmap_of_tx<T: Transaction>(
        tx: &T,
        field: &str,
        value: &str,
    ) -> SparseResult<RoaringBitmap> {
        Self::load(tx, &filter_key(field, value))
    }

    /// Add one id to a `(field, value)` bitmap.
    pub fn add_tx<T: Transaction>(
        tx: &mut T,
        field: &str,
        value: &str,
        id: DocId,
    ) -> SparseResult<()> {
        let key = filter_key(field, value);
        let mut bitmap = Self::load(tx, &key)?;
        bitmap.insert(bitmap_id(id));
        Self::store(tx, &key, &bitmap)
    }

    /// Add many ids to a `(field, value)` bitmap in one read-modify-write.
    pub fn add_batch_tx<T: Transaction>(
        tx: &mut T,
        field: &str,
        value: &str,
        ids: &[DocId],
    ) -> SparseResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let key = filter_key(field, value);
        let mut bitmap = Self::load(tx, &key)?;
        for &id in ids {
            bitmap.insert(bitmap_id(id));
        }
        Self::store(tx, &key, &bitmap)
    }

    /// Remove one id; the key is deleted when its bitmap empties.
    pub fn remove_tx<T: Transaction>(
        tx: &mut T,
        field: &str,
        value: &str,
        id: DocId,
    ) -> SparseResult<()> {
        let key = filter_key(field, value);
        let mut bitmap = Self::load(tx, &key)?;
        bitmap.remove(bitmap_id(id));
        if bitmap.is_empty() {
            tx.delete(tables::FILTER_BITMAPS, &key)?;
            Ok(())
        } else {
            Self::store(tx, &key, &bitmap)
        }
    }

    fn load<T: Transaction>(tx: &T, key: &[u8]) -> SparseResult<RoaringBitmap> {
        match tx.get(tables::FILTER_BITMAPS, key)? {
            Some(bytes) => RoaringBitmap::deserialize_from(&bytes[..])
                .map_err(|e| SparseError::Corrupt(format!("filter bitmap: {e}"))),
            None => Ok(RoaringBitmap::new()),
        }
    }

    fn store<T: Transaction>(tx: &mut T, key: &[u8], bitmap: &RoaringBitmap) -> SparseResult<()> {
        let mut bytes = Vec::with_capacity(bitmap.serialized_size());
        bitmap
            .serialize_into(&mut bytes)
            .map_err(|e| SparseError::Internal(format!("bitmap serialization: {e}")))?;
        tx.put(tables::FILTER_BITMAPS, key, &bytes)?;
        Ok(())
    }

    // ========================================================================
    // Self-transacting wrappers
    // ========================================================================

    /// Bitmap for a `(field, value)` pair, empty if absent.
    pub fn bitmap_of(&self, field: &str, value: &str) -> SparseResult<RoaringBitmap> {
        let tx = self.engine.begin_read()?;
        Self::bitmap_of_tx(&tx, field, value)
    }

    /// Whether the `(field, value)` bitmap contains the id.
    pub fn contains(&self, field: &str, value: &str, id: DocId) -> SparseResult<bool> {
        Ok(self.bitmap_of(field, value)?.contains(bitmap_id(id)))
    }

    /// Add one id, in its own transaction.
    pub fn add(&self, field: &str, value: &str, id: DocId) -> SparseResult<()> {
        let mut tx = self.engine.begin_write()?;
        Self::add_tx(&mut tx, field, value, id)?;
        tx.commit()?;
        Ok(())
    }

    /// Add many ids, in its own transaction.
    pub fn add_batch(&self, field: &str, value: &str, ids: &[DocId]) -> SparseResult<()> {
        let mut tx = self.engine.begin_write()?;
        Self::add_batch_tx(&mut tx, field, value, ids)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove one id, in its own transaction.
    pub fn remove(&self, field: &str, value: &str, id: DocId) -> SparseResult<()> {
        let mut tx = self.engine.begin_write()?;
        Self::remove_tx(&mut tx, field, value, id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticedb_storage::backends::RedbEngine;

    fn index() -> BitmapIndex<RedbEngine> {
        BitmapIndex::new(Arc::new(RedbEngine::in_memory().unwrap()))
    }

    #[test]
    fn add_and_contains() {
        let idx = index();
        idx.add("category", "Billing", 10).unwrap();
        idx.add("category", "Billing", 11).unwrap();

        assert!(idx.contains("category", "Billing", 10).unwrap());
        assert!(idx.contains("category", "Billing", 11).unwrap());
        assert!(!idx.contains("category", "Billing", 12).unwrap());
        assert!(!idx.contains("category", "Tech", 10).unwrap());
    }

    #[test]
    fn missing_key_reads_empty() {
        let idx = index();
        let bitmap = idx.bitmap_of("nope", "nothing").unwrap();
        assert!(bitmap.is_empty());
    }

    #[test]
    fn add_batch_is_one_bitmap() {
        let idx = index();
        idx.add_batch("tag", "hot", &[1, 2, 3, 100]).unwrap();
        let bitmap = idx.bitmap_of("tag", "hot").unwrap();
        assert_eq!(bitmap.len(), 4);
        assert!(bitmap.contains(100));
    }

    #[test]
    fn remove_deletes_empty_bitmap_key() {
        let idx = index();
        idx.add("tag", "hot", 5).unwrap();
        idx.remove("tag", "hot", 5).unwrap();

        // The key is gone entirely, not just an empty bitmap.
        let tx = idx.engine.begin_read().unwrap();
        assert_eq!(tx.get(tables::FILTER_BITMAPS, &filter_key("tag", "hot")).unwrap(), None);
    }

    #[test]
    fn remove_keeps_remaining_ids() {
        let idx = index();
        idx.add_batch("tag", "hot", &[1, 2]).unwrap();
        idx.remove("tag", "hot", 1).unwrap();
        let bitmap = idx.bitmap_of("tag", "hot").unwrap();
        assert_eq!(bitmap.len(), 1);
        assert!(bitmap.contains(2));
    }

    #[test]
    fn corrupt_bitmap_surfaces() {
        let idx = index();
        {
            let mut tx = idx.engine.begin_write().unwrap();
            tx.put(tables::FILTER_BITMAPS, &filter_key("bad", "blob"), b"not a bitmap").unwrap();
            tx.commit().unwrap();
        }
        assert!(matches!(idx.bitmap_of("bad", "blob"), Err(SparseError::Corrupt(_))));
    }
}
