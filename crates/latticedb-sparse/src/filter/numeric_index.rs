//! Bucketed numeric index.
//!
//! Numeric filter values are mapped to order-preserving u32 keys (see
//! `latticedb_core::encoding::sortable`) and stored twice:
//!
//! - `numeric_forward`: `field:ascii(id)` → the id's current sortable value,
//!   for point predicate checks and old-value relocation on update.
//! - `numeric_inverted`: `field:be32(start)` → a bucket of up to
//!   [`BUCKET_MAX_SIZE`] `(sortable, id)` entries sorted by value. Bucket
//!   keys are big-endian so a cursor walks buckets in numeric order; a
//!   bucket owns the value range from its start up to the next bucket's
//!   start.
//!
//! Buckets split in half when they fill; the upper half is re-keyed at its
//! first value. Splitting makes progress even when every entry shares one
//! sortable value, because capacity counts duplicates.

use std::sync::Arc;

use roaring::RoaringBitmap;

use latticedb_core::{DocId, DOC_ID_BYTES};
use latticedb_storage::{Cursor, StorageEngine, Transaction};

use crate::encoding::keys::{bucket_key, bucket_prefix, decode_bucket_key, numeric_forward_key, tables};
use crate::error::{SparseError, SparseResult};

/// Maximum entries a bucket holds before it splits.
pub const BUCKET_MAX_SIZE: usize = 512;

/// Size of one serialized bucket entry.
const ENTRY_LEN: usize = 4 + DOC_ID_BYTES;

/// An in-memory bucket: `(sortable, id)` entries sorted by value then id.
#[derive(Debug, Default, Clone, PartialEq)]
struct Bucket {
    entries: Vec<(u32, DocId)>,
}

impl Bucket {
    /// Serialize as `count:u32 le || [sortable:u32 le, id:uN le]*count`.
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.entries.len() * ENTRY_LEN);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for &(sortable, id) in &self.entries {
            buf.extend_from_slice(&sortable.to_le_bytes());
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    /// Deserialize, validating the blob length against the declared count.
    fn deserialize(bytes: &[u8]) -> SparseResult<Self> {
        if bytes.len() < 4 {
            return Err(SparseError::Corrupt("numeric bucket shorter than its count".to_string()));
        }
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() != 4 + count * ENTRY_LEN {
            return Err(SparseError::Corrupt(format!(
                "numeric bucket length mismatch: {} entries declared, {} bytes",
                count,
                bytes.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let at = 4 + i * ENTRY_LEN;
            let sortable =
                u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
            let id_bytes: [u8; DOC_ID_BYTES] =
                bytes[at + 4..at + ENTRY_LEN].try_into().expect("entry length is fixed");
            entries.push((sortable, DocId::from_le_bytes(id_bytes)));
        }
        Ok(Self { entries })
    }

    fn add(&mut self, sortable: u32, id: DocId) {
        let at = self.entries.partition_point(|&e| e < (sortable, id));
        self.entries.insert(at, (sortable, id));
    }

    fn remove(&mut self, id: DocId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|&(_, entry_id)| entry_id != id);
        self.entries.len() != before
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= BUCKET_MAX_SIZE
    }

    /// Split off the upper half. `self` keeps the lower half.
    fn split(&mut self) -> Bucket {
        let mid = self.entries.len() / 2;
        Bucket { entries: self.entries.split_off(mid) }
    }

    fn min_val(&self) -> u32 {
        self.entries.first().map_or(0, |&(v, _)| v)
    }
}

/// Locate the bucket that owns `value`: the greatest in-field key whose
/// start is `<= value`, or the field's first bucket when `value` precedes
/// every start. Returns the bucket's key, or `None` when the field has no
/// buckets at all.
fn locate_bucket<C: Cursor>(
    cursor: &mut C,
    field: &str,
    value: u32,
) -> SparseResult<Option<Vec<u8>>> {
    let target = bucket_key(field, value);
    let prefix = bucket_prefix(field);

    match cursor.seek(&target)? {
        Some((key, _)) if key == target => Ok(Some(key)),
        Some((key, _)) if key.starts_with(&prefix) => {
            // Landed on a later bucket of the same field; the owner, if any,
            // is the bucket just before it.
            match cursor.prev()? {
                Some((prev_key, _)) if prev_key.starts_with(&prefix) => Ok(Some(prev_key)),
                // No earlier in-field bucket: the landed one is the field's
                // first and takes values below its start.
                _ => Ok(Some(key)),
            }
        }
        // Landed on another field, or past the end of the store: the owner
        // would be the last in-field key before the landing point.
        _ => match cursor.prev()? {
            Some((prev_key, _)) if prev_key.starts_with(&prefix) => Ok(Some(prev_key)),
            _ => Ok(None),
        },
    }
}

/// Bucketed numeric index over order-preserving u32 keys.
pub struct NumericIndex<E> {
    engine: Arc<E>,
}

impl<E: StorageEngine> NumericIndex<E> {
    /// Create a numeric index on the given engine.
    #[must_use]
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    // ========================================================================
    // Transaction-scoped entry points
    // ========================================================================

    /// Set the value for `(field, id)`, relocating the id's bucket entry if
    /// it already had a different value.
    pub fn put_tx<T: Transaction>(
        tx: &mut T,
        field: &str,
        id: DocId,
        sortable: u32,
    ) -> SparseResult<()> {
        let fwd_key = numeric_forward_key(field, id);
        if let Some(bytes) = tx.get(tables::NUMERIC_FORWARD, &fwd_key)? {
            let old = decode_forward(&bytes)?;
            if old == sortable {
                return Ok(());
            }
            Self::remove_from_bucket(tx, field, old, id)?;
        }

        tx.put(tables::NUMERIC_FORWARD, &fwd_key, &sortable.to_le_bytes())?;
        Self::add_to_bucket(tx, field, sortable, id)
    }

    /// Drop `(field, id)` from both sub-stores.
    pub fn remove_tx<T: Transaction>(tx: &mut T, field: &str, id: DocId) -> SparseResult<()> {
        let fwd_key = numeric_forward_key(field, id);
        if let Some(bytes) = tx.get(tables::NUMERIC_FORWARD, &fwd_key)? {
            let old = decode_forward(&bytes)?;
            Self::remove_from_bucket(tx, field, old, id)?;
            tx.delete(tables::NUMERIC_FORWARD, &fwd_key)?;
        }
        Ok(())
    }

    /// Ids whose value falls in `[lo, hi]` (sortable space, inclusive).
    pub fn range_tx<T: Transaction>(
        tx: &T,
        field: &str,
        lo: u32,
        hi: u32,
    ) -> SparseResult<RoaringBitmap> {
        let mut result = RoaringBitmap::new();
        let prefix = bucket_prefix(field);

        let mut cursor = tx.cursor(tables::NUMERIC_INVERTED)?;
        let Some(start_key) = locate_bucket(&mut cursor, field, lo)? else {
            return Ok(result);
        };

        // The locate call leaves the cursor positioned, but on the landing
        // probe rather than necessarily on `start_key`; reposition exactly.
        let mut entry = cursor.seek(&start_key)?;
        while let Some((key, value)) = entry {
            let Some(bucket_start) = decode_bucket_key(&key, &prefix) else {
                break;
            };
            if bucket_start > hi {
                break;
            }
            let bucket = Bucket::deserialize(&value)?;
            for &(sortable, id) in &bucket.entries {
                if sortable >= lo && sortable <= hi {
                    result.insert(range_id(id));
                }
            }
            entry = cursor.next()?;
        }
        Ok(result)
    }

    /// Whether `(field, id)` currently holds a value in `[lo, hi]`.
    pub fn check_range_tx<T: Transaction>(
        tx: &T,
        field: &str,
        id: DocId,
        lo: u32,
        hi: u32,
    ) -> SparseResult<bool> {
        match tx.get(tables::NUMERIC_FORWARD, &numeric_forward_key(field, id))? {
            Some(bytes) => {
                let value = decode_forward(&bytes)?;
                Ok(value >= lo && value <= hi)
            }
            None => Ok(false),
        }
    }

    fn add_to_bucket<T: Transaction>(
        tx: &mut T,
        field: &str,
        sortable: u32,
        id: DocId,
    ) -> SparseResult<()> {
        let found = {
            let mut cursor = tx.cursor(tables::NUMERIC_INVERTED)?;
            locate_bucket(&mut cursor, field, sortable)?
        };

        let (mut key, mut bucket) = match found {
            Some(key) => {
                let bytes = tx.get(tables::NUMERIC_INVERTED, &key)?.ok_or_else(|| {
                    SparseError::Internal("located numeric bucket vanished".to_string())
                })?;
                (key, Bucket::deserialize(&bytes)?)
            }
            // First bucket of the field starts at the incoming value.
            None => (bucket_key(field, sortable), Bucket::default()),
        };

        bucket.add(sortable, id);

        // A value below the field's first bucket lands in that bucket; re-key
        // it so the bucket start stays <= every entry it holds.
        if bucket.min_val() < decode_bucket_key(&key, &bucket_prefix(field)).unwrap_or(u32::MAX) {
            tx.delete(tables::NUMERIC_INVERTED, &key)?;
            key = bucket_key(field, bucket.min_val());
        }

        if bucket.is_full() {
            let upper = bucket.split();
            let upper_key = bucket_key(field, upper.min_val());
            tx.put(tables::NUMERIC_INVERTED, &key, &bucket.serialize())?;
            tx.put(tables::NUMERIC_INVERTED, &upper_key, &upper.serialize())?;
        } else {
            tx.put(tables::NUMERIC_INVERTED, &key, &bucket.serialize())?;
        }
        Ok(())
    }

    fn remove_from_bucket<T: Transaction>(
        tx: &mut T,
        field: &str,
        sortable: u32,
        id: DocId,
    ) -> SparseResult<()> {
        let found = {
            let mut cursor = tx.cursor(tables::NUMERIC_INVERTED)?;
            locate_bucket(&mut cursor, field, sortable)?
        };
        let Some(key) = found else {
            return Ok(());
        };
        let Some(bytes) = tx.get(tables::NUMERIC_INVERTED, &key)? else {
            return Ok(());
        };

        let mut bucket = Bucket::deserialize(&bytes)?;
        if bucket.remove(id) {
            if bucket.entries.is_empty() {
                tx.delete(tables::NUMERIC_INVERTED, &key)?;
            } else {
                tx.put(tables::NUMERIC_INVERTED, &key, &bucket.serialize())?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Self-transacting wrappers
    // ========================================================================

    /// Set the value for `(field, id)` in its own transaction.
    pub fn put(&self, field: &str, id: DocId, sortable: u32) -> SparseResult<()> {
        let mut tx = self.engine.begin_write()?;
        Self::put_tx(&mut tx, field, id, sortable)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove `(field, id)` in its own transaction.
    pub fn remove(&self, field: &str, id: DocId) -> SparseResult<()> {
        let mut tx = self.engine.begin_write()?;
        Self::remove_tx(&mut tx, field, id)?;
        tx.commit()?;
        Ok(())
    }

    /// Ids whose value falls in `[lo, hi]`, on a fresh snapshot.
    pub fn range(&self, field: &str, lo: u32, hi: u32) -> SparseResult<RoaringBitmap> {
        let tx = self.engine.begin_read()?;
        Self::range_tx(&tx, field, lo, hi)
    }

    /// Point predicate check via the forward index.
    pub fn check_range(&self, field: &str, id: DocId, lo: u32, hi: u32) -> SparseResult<bool> {
        let tx = self.engine.begin_read()?;
        Self::check_range_tx(&tx, field, id, lo, hi)
    }
}

/// Decode a 4-byte forward entry.
fn decode_forward(bytes: &[u8]) -> SparseResult<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| SparseError::Corrupt("numeric forward entry is not 4 bytes".to_string()))?;
    Ok(u32::from_le_bytes(arr))
}

/// Narrow a doc id to the bitmap domain.
#[cfg(feature = "id64")]
#[inline]
fn range_id(id: DocId) -> u32 {
    debug_assert!(id <= u64::from(u32::MAX), "filter bitmaps require ids to fit 32 bits");
    id as u32
}

/// Narrow a doc id to the bitmap domain.
#[cfg(not(feature = "id64"))]
#[inline]
fn range_id(id: DocId) -> u32 {
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticedb_core::encoding::sortable::{float_to_sortable, int_to_sortable};
    use latticedb_storage::backends::RedbEngine;

    fn index() -> NumericIndex<RedbEngine> {
        NumericIndex::new(Arc::new(RedbEngine::in_memory().unwrap()))
    }

    fn ids(bitmap: &RoaringBitmap) -> Vec<u32> {
        bitmap.iter().collect()
    }

    #[test]
    fn bucket_roundtrip() {
        let mut bucket = Bucket::default();
        bucket.add(30, 3);
        bucket.add(10, 1);
        bucket.add(20, 2);
        let restored = Bucket::deserialize(&bucket.serialize()).unwrap();
        assert_eq!(restored.entries, vec![(10, 1), (20, 2), (30, 3)]);
    }

    #[test]
    fn bucket_rejects_bad_length() {
        let mut bytes = 2u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; ENTRY_LEN]); // one entry, two declared
        assert!(matches!(Bucket::deserialize(&bytes), Err(SparseError::Corrupt(_))));
    }

    #[test]
    fn put_then_point_range_finds_id() {
        let idx = index();
        let v = int_to_sortable(42);
        idx.put("price", 7, v).unwrap();

        assert!(idx.range("price", v, v).unwrap().contains(7));
        assert!(idx.check_range("price", 7, v, v).unwrap());
    }

    #[test]
    fn update_relocates_value() {
        let idx = index();
        let v1 = int_to_sortable(10);
        let v2 = int_to_sortable(25);
        idx.put("price", 2, v1).unwrap();
        idx.put("price", 2, v2).unwrap();

        assert!(!idx.range("price", v1, v1).unwrap().contains(2));
        assert!(idx.range("price", v2, v2).unwrap().contains(2));
        assert!(!idx.check_range("price", 2, v1, v1).unwrap());
        assert!(idx.check_range("price", 2, v2, v2).unwrap());
    }

    #[test]
    fn range_spans_values() {
        let idx = index();
        for (id, price) in [(1, 5i32), (2, 10), (3, 15), (4, 20)] {
            idx.put("price", id, int_to_sortable(price)).unwrap();
        }

        let got = idx.range("price", int_to_sortable(10), int_to_sortable(15)).unwrap();
        assert_eq!(ids(&got), vec![2, 3]);
    }

    #[test]
    fn range_handles_negative_and_float_order() {
        let idx = index();
        for (id, value) in [(1, -2.5f32), (2, -0.5), (3, 0.5), (4, 99.0)] {
            idx.put("score", id, float_to_sortable(value)).unwrap();
        }

        let got =
            idx.range("score", float_to_sortable(-1.0), float_to_sortable(1.0)).unwrap();
        assert_eq!(ids(&got), vec![2, 3]);
    }

    #[test]
    fn remove_clears_both_stores() {
        let idx = index();
        let v = int_to_sortable(5);
        idx.put("price", 1, v).unwrap();
        idx.remove("price", 1).unwrap();

        assert!(idx.range("price", v, v).unwrap().is_empty());
        assert!(!idx.check_range("price", 1, v, v).unwrap());
    }

    #[test]
    fn fields_are_disjoint() {
        let idx = index();
        let v = int_to_sortable(1);
        idx.put("a", 1, v).unwrap();
        idx.put("b", 2, v).unwrap();

        assert_eq!(ids(&idx.range("a", 0, u32::MAX).unwrap()), vec![1]);
        assert_eq!(ids(&idx.range("b", 0, u32::MAX).unwrap()), vec![2]);
    }

    #[test]
    fn value_below_first_bucket_is_reachable() {
        let idx = index();
        idx.put("price", 1, int_to_sortable(100)).unwrap();
        // A later insert below the first bucket's start lands in that bucket.
        idx.put("price", 2, int_to_sortable(-100)).unwrap();

        let got = idx.range("price", int_to_sortable(-200), int_to_sortable(0)).unwrap();
        assert_eq!(ids(&got), vec![2]);
    }

    #[test]
    fn buckets_split_and_stay_bounded() {
        let idx = index();
        let n = (BUCKET_MAX_SIZE + 100) as i32;
        {
            // One transaction keeps the test fast.
            let mut tx = idx.engine.begin_write().unwrap();
            for i in 0..n {
                NumericIndex::<RedbEngine>::put_tx(&mut tx, "price", i as DocId, int_to_sortable(i))
                    .unwrap();
            }
            tx.commit().unwrap();
        }

        // Every id is still reachable.
        let all = idx.range("price", int_to_sortable(0), int_to_sortable(n - 1)).unwrap();
        assert_eq!(all.len(), n as u64);

        // And no bucket exceeds the cap.
        let tx = idx.engine.begin_read().unwrap();
        let mut cursor = tx.cursor(tables::NUMERIC_INVERTED).unwrap();
        let mut buckets = 0;
        while let Some((_, value)) = cursor.next().unwrap() {
            let bucket = Bucket::deserialize(&value).unwrap();
            assert!(bucket.entries.len() <= BUCKET_MAX_SIZE);
            buckets += 1;
        }
        assert!(buckets >= 2, "expected at least one split, saw {buckets} buckets");
    }

    #[test]
    fn bucket_ranges_partition_the_field() {
        let idx = index();
        let mut tx = idx.engine.begin_write().unwrap();
        // Insert out of order, including values below the first bucket start.
        for i in (0..800i32).rev() {
            NumericIndex::<RedbEngine>::put_tx(&mut tx, "p", i as DocId, int_to_sortable(i))
                .unwrap();
        }
        tx.commit().unwrap();

        let tx = idx.engine.begin_read().unwrap();
        let mut cursor = tx.cursor(tables::NUMERIC_INVERTED).unwrap();
        let prefix = bucket_prefix("p");
        let mut previous_end: Option<u32> = None;
        while let Some((key, value)) = cursor.next().unwrap() {
            let start = decode_bucket_key(&key, &prefix).unwrap();
            let bucket = Bucket::deserialize(&value).unwrap();
            assert!(bucket.entries.iter().all(|&(v, _)| v >= start));
            if let Some(end) = previous_end {
                assert!(start > end, "bucket ranges must not overlap");
            }
            previous_end = bucket.entries.last().map(|&(v, _)| v);
        }
    }

    #[test]
    fn split_progresses_on_duplicate_values() {
        let idx = index();
        let v = int_to_sortable(7);
        let mut tx = idx.engine.begin_write().unwrap();
        for id in 0..(BUCKET_MAX_SIZE + 10) as u32 {
            NumericIndex::<RedbEngine>::put_tx(&mut tx, "dup", id as DocId, v).unwrap();
        }
        tx.commit().unwrap();

        let all = idx.range("dup", v, v).unwrap();
        assert_eq!(all.len(), (BUCKET_MAX_SIZE + 10) as u64);
    }
}
