//! Trait-compliance tests for the redb backend.
//!
//! These exercise the `Transaction` and `Cursor` contracts the index layers
//! rely on: snapshot isolation, ordered iteration, seek/step-back, and
//! read-only enforcement.

use std::ops::Bound;

use latticedb_storage::backends::RedbEngine;
use latticedb_storage::{Cursor, StorageEngine, StorageError, Transaction};

fn engine() -> RedbEngine {
    RedbEngine::in_memory().expect("failed to create in-memory engine")
}

#[test]
fn basic_operations() {
    let engine = engine();

    {
        let mut tx = engine.begin_write().unwrap();
        tx.put("t", b"key1", b"value1").unwrap();
        tx.commit().unwrap();
    }

    {
        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get("t", b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(tx.get("t", b"missing").unwrap(), None);
        assert_eq!(tx.get("empty_table", b"key1").unwrap(), None);
    }

    {
        let mut tx = engine.begin_write().unwrap();
        assert!(tx.delete("t", b"key1").unwrap());
        assert!(!tx.delete("t", b"key1").unwrap());
        tx.commit().unwrap();
    }

    let tx = engine.begin_read().unwrap();
    assert_eq!(tx.get("t", b"key1").unwrap(), None);
}

#[test]
fn rollback_discards_writes() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    tx.put("t", b"key", b"value").unwrap();
    tx.rollback().unwrap();

    let tx = engine.begin_read().unwrap();
    assert_eq!(tx.get("t", b"key").unwrap(), None);
}

#[test]
fn read_only_enforcement() {
    let engine = engine();
    let mut tx = engine.begin_read().unwrap();
    assert!(matches!(tx.put("t", b"k", b"v"), Err(StorageError::ReadOnly)));
    assert!(matches!(tx.delete("t", b"k"), Err(StorageError::ReadOnly)));
}

#[test]
fn snapshot_isolation() {
    let engine = engine();

    {
        let mut tx = engine.begin_write().unwrap();
        tx.put("t", b"key", b"before").unwrap();
        tx.commit().unwrap();
    }

    let reader = engine.begin_read().unwrap();

    {
        let mut tx = engine.begin_write().unwrap();
        tx.put("t", b"key", b"after").unwrap();
        tx.commit().unwrap();
    }

    // The old snapshot still sees the old value.
    assert_eq!(reader.get("t", b"key").unwrap(), Some(b"before".to_vec()));

    let fresh = engine.begin_read().unwrap();
    assert_eq!(fresh.get("t", b"key").unwrap(), Some(b"after".to_vec()));
}

#[test]
fn tables_are_disjoint() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    tx.put("a", b"key", b"in_a").unwrap();
    tx.put("b", b"key", b"in_b").unwrap();
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();
    assert_eq!(tx.get("a", b"key").unwrap(), Some(b"in_a".to_vec()));
    assert_eq!(tx.get("b", b"key").unwrap(), Some(b"in_b".to_vec()));

    // A cursor over table "a" never leaks "b" entries.
    let mut cursor = tx.cursor("a").unwrap();
    let mut seen = Vec::new();
    while let Some((k, v)) = cursor.next().unwrap() {
        seen.push((k, v));
    }
    assert_eq!(seen, vec![(b"key".to_vec(), b"in_a".to_vec())]);
}

#[test]
fn cursor_full_scan_is_ordered() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    for key in [b"c".as_slice(), b"a", b"d", b"b"] {
        tx.put("t", key, key).unwrap();
    }
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();
    let mut cursor = tx.cursor("t").unwrap();
    let mut keys = Vec::new();
    while let Some((k, _)) = cursor.next().unwrap() {
        keys.push(k);
    }
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn cursor_seek_and_prev() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    for key in [b"a".as_slice(), b"c", b"e"] {
        tx.put("t", key, b"").unwrap();
    }
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();
    let mut cursor = tx.cursor("t").unwrap();

    // Seek lands on the first key >= target.
    let (k, _) = cursor.seek(b"b").unwrap().unwrap();
    assert_eq!(k, b"c".to_vec());

    // Stepping back reaches the preceding key.
    let (k, _) = cursor.prev().unwrap().unwrap();
    assert_eq!(k, b"a".to_vec());

    // No key at or after "f": seek yields nothing, prev falls to the last.
    assert!(cursor.seek(b"f").unwrap().is_none());
    let (k, _) = cursor.prev().unwrap().unwrap();
    assert_eq!(k, b"e".to_vec());
}

#[test]
fn cursor_seek_exact_match() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    tx.put("t", b"a", b"").unwrap();
    tx.put("t", b"b", b"").unwrap();
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();
    let mut cursor = tx.cursor("t").unwrap();
    let (k, _) = cursor.seek(b"b").unwrap().unwrap();
    assert_eq!(k, b"b".to_vec());
}

#[test]
fn range_scan_bounds() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    for i in 0u8..10 {
        tx.put("t", &[i], &[i]).unwrap();
    }
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();

    let collect = |start: Bound<&[u8]>, end: Bound<&[u8]>| -> Vec<u8> {
        let mut cursor = tx.range("t", start, end).unwrap();
        let mut out = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            out.push(k[0]);
        }
        out
    };

    assert_eq!(collect(Bound::Included(&[3]), Bound::Included(&[6])), vec![3, 4, 5, 6]);
    assert_eq!(collect(Bound::Excluded(&[3]), Bound::Excluded(&[6])), vec![4, 5]);
    assert_eq!(collect(Bound::Unbounded, Bound::Excluded(&[2])), vec![0, 1]);
    assert_eq!(collect(Bound::Included(&[8]), Bound::Unbounded), vec![8, 9]);
}

#[test]
fn cursor_seek_last() {
    let engine = engine();

    let mut tx = engine.begin_write().unwrap();
    for key in [b"a".as_slice(), b"b", b"c"] {
        tx.put("t", key, b"").unwrap();
    }
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();
    let mut cursor = tx.cursor("t").unwrap();
    let (k, _) = cursor.seek_last().unwrap().unwrap();
    assert_eq!(k, b"c".to_vec());
    let (k, _) = cursor.prev().unwrap().unwrap();
    assert_eq!(k, b"b".to_vec());
}

#[test]
fn cursor_streams_across_batches() {
    let engine = engine();

    // Write more entries than one cursor batch holds.
    let mut tx = engine.begin_write().unwrap();
    for i in 0u16..1500 {
        tx.put("t", &i.to_be_bytes(), b"").unwrap();
    }
    tx.commit().unwrap();

    let tx = engine.begin_read().unwrap();
    let mut cursor = tx.cursor("t").unwrap();
    let mut count = 0u16;
    while let Some((k, _)) = cursor.next().unwrap() {
        assert_eq!(k, count.to_be_bytes().to_vec());
        count += 1;
    }
    assert_eq!(count, 1500);

    // And backwards from the end.
    let mut cursor = tx.cursor("t").unwrap();
    cursor.seek_last().unwrap().unwrap();
    let mut count = 1499u16;
    while let Some((k, _)) = cursor.prev().unwrap() {
        count -= 1;
        assert_eq!(k, count.to_be_bytes().to_vec());
    }
    assert_eq!(count, 0);
}
