//! End-to-end scenarios over the full store: filtered retrieval, numeric
//! updates, block splits, id reuse and crash recovery.

use latticedb_core::{DocId, SparseVector};
use latticedb_sparse::{SparseStore, SparseError};
use latticedb_storage::backends::RedbEngine;
use latticedb_storage::{StorageEngine, Transaction, WalOp, WalRecord};
use serde_json::json;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> SparseStore<RedbEngine> {
    let engine = RedbEngine::open(dir.path().join("index.redb")).unwrap();
    SparseStore::open(engine, dir.path().join("index.wal")).unwrap()
}

fn memory_store(dir: &TempDir) -> SparseStore<RedbEngine> {
    SparseStore::open(RedbEngine::in_memory().unwrap(), dir.path().join("index.wal")).unwrap()
}

fn vector(pairs: &[(u32, f32)]) -> SparseVector {
    SparseVector::new(pairs.to_vec()).unwrap()
}

fn hit_keys(store: &SparseStore<RedbEngine>, query: &SparseVector, k: usize) -> Vec<Vec<u8>> {
    store
        .search(query, k, None)
        .unwrap()
        .into_iter()
        .map(|hit| hit.external_id)
        .collect()
}

#[test]
fn exact_match_filter() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    for key in ["b-10", "b-11", "b-12"] {
        store
            .insert(key, vector(&[(1, 0.5)]), Some(json!({"category": "Billing"})))
            .unwrap();
    }
    for key in ["t-20", "t-21"] {
        store.insert(key, vector(&[(1, 0.5)]), Some(json!({"category": "Tech"}))).unwrap();
    }

    let matched = store
        .filters()
        .matching_ids(&json!([{"category": {"$eq": "Billing"}}]))
        .unwrap();
    assert_eq!(matched, vec![1, 2, 3]);

    // And through search: only the Billing docs can surface.
    let hits = store
        .search(&vector(&[(1, 1.0)]), 10, Some(&json!([{"category": {"$eq": "Billing"}}])))
        .unwrap();
    let mut keys: Vec<Vec<u8>> = hits.into_iter().map(|h| h.external_id).collect();
    keys.sort();
    assert_eq!(keys, vec![b"b-10".to_vec(), b"b-11".to_vec(), b"b-12".to_vec()]);
}

#[test]
fn numeric_range_with_update() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    for (key, price) in [("d1", 5), ("d2", 10), ("d3", 15), ("d4", 20)] {
        store.insert(key, vector(&[(1, 0.5)]), Some(json!({"price": price}))).unwrap();
    }

    let conditions = json!([{"price": {"$range": [10, 15]}}]);
    assert_eq!(store.filters().matching_ids(&conditions).unwrap(), vec![2, 3]);

    // Updating d2's price relocates it out of the range.
    store.insert("d2", vector(&[(1, 0.5)]), Some(json!({"price": 25}))).unwrap();
    assert_eq!(store.filters().matching_ids(&conditions).unwrap(), vec![3]);
    assert_eq!(store.filters().matching_ids(&json!([{"price": {"$eq": 25}}])).unwrap(), vec![2]);
}

#[test]
fn bmw_top_k() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    store.insert("d1", vector(&[(1, 1.0), (2, 0.5)]), None).unwrap();
    store.insert("d2", vector(&[(1, 0.5), (3, 1.0)]), None).unwrap();
    store.insert("d3", vector(&[(2, 1.0), (3, 0.5)]), None).unwrap();

    let hits = store.search(&vector(&[(1, 1.0), (2, 1.0)]), 2, None).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].external_id, b"d1".to_vec());
    assert!((hits[0].score - 1.5).abs() < 2.0 * 1.5 / 255.0);
    assert_eq!(hits[1].external_id, b"d3".to_vec());
    assert!((hits[1].score - 1.0).abs() < 2.0 * 1.0 / 255.0);
}

#[test]
fn block_split_keeps_every_posting_reachable() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    let items: Vec<latticedb_sparse::InsertItem> = (1..=161)
        .map(|i| latticedb_sparse::InsertItem {
            external_id: format!("doc-{i:03}").into_bytes(),
            vector: vector(&[(7, 0.5)]),
            payload: None,
        })
        .collect();
    store.insert_batch(items).unwrap();

    // The term's block list split once, anchored at the median doc id.
    let blocks = store.bmw().blocks_of(7).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].start_doc_id, 1);
    assert_eq!(blocks[1].start_doc_id, 81);

    let keys = hit_keys(&store, &vector(&[(7, 1.0)]), 200);
    assert_eq!(keys.len(), 161);
}

#[test]
fn id_reuse_after_delete() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    let outcomes = store
        .insert_batch(
            ["a", "b", "c"]
                .iter()
                .map(|k| latticedb_sparse::InsertItem {
                    external_id: k.as_bytes().to_vec(),
                    vector: vector(&[(1, 0.5)]),
                    payload: None,
                })
                .collect(),
        )
        .unwrap();
    assert_eq!(outcomes.iter().map(|o| o.doc_id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(outcomes.iter().all(|o| !o.updated));

    let deleted = store.delete(&[b"b".as_slice()]).unwrap();
    assert_eq!(deleted, vec![2]);

    let outcome = store.insert("d", vector(&[(1, 0.9)]), None).unwrap();
    assert_eq!(outcome.doc_id, 2);

    // The WAL carries three adds, then the delete, then the reuse.
    let records = store.wal().read_records().unwrap();
    let adds: Vec<DocId> = records
        .iter()
        .filter(|r| r.op == WalOp::VectorAdd)
        .map(|r| r.doc_id)
        .collect();
    assert_eq!(adds, vec![1, 2, 3, 2]);
    assert!(records.contains(&WalRecord::new(WalOp::VectorDelete, 2)));

    // The reused doc is live under its new key only.
    assert!(store.get_vector(b"b").unwrap().is_none());
    assert!(store.get_vector(b"d").unwrap().is_some());
    assert_eq!(store.len().unwrap(), 3);
}

#[test]
fn deleted_docs_drop_out_of_search() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    store.insert("a", vector(&[(1, 1.0)]), Some(json!({"tag": "x"}))).unwrap();
    store.insert("b", vector(&[(1, 0.9)]), Some(json!({"tag": "x"}))).unwrap();

    store.delete(&[b"a".as_slice()]).unwrap();

    assert_eq!(hit_keys(&store, &vector(&[(1, 1.0)]), 10), vec![b"b".to_vec()]);
    assert_eq!(store.filters().matching_ids(&json!([{"tag": {"$eq": "x"}}])).unwrap(), vec![2]);
}

#[test]
fn update_replaces_postings() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    store.insert("a", vector(&[(1, 1.0)]), None).unwrap();
    let outcome = store.insert("a", vector(&[(2, 1.0)]), None).unwrap();
    assert!(outcome.updated);

    assert!(hit_keys(&store, &vector(&[(1, 1.0)]), 10).is_empty());
    assert_eq!(hit_keys(&store, &vector(&[(2, 1.0)]), 10), vec![b"a".to_vec()]);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn crash_before_document_commit_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let engine = RedbEngine::open(dir.path().join("index.redb")).unwrap();
    let wal_path = dir.path().join("index.wal");

    // A committed doc, then a simulated crash: the id mapper committed the
    // mapping and the WAL record for "x", but the document batch never ran.
    {
        let store = SparseStore::open(engine, &wal_path).unwrap();
        store.insert("ok", vector(&[(1, 1.0)]), None).unwrap();
        let mapped = store
            .ids()
            .create_ids_batch(&[b"x".as_slice()], true, Some(store.wal()))
            .unwrap();
        assert_eq!(mapped[0].doc_id, 2);
        // Process dies here.
    }

    let engine = RedbEngine::open(dir.path().join("index.redb")).unwrap();
    let store = SparseStore::open(engine, &wal_path).unwrap();
    assert!(store.wal().has_entries());

    let report = store.recover().unwrap();
    assert_eq!(report.completed, vec![1]);
    assert_eq!(report.reclaimed, vec![2]);
    assert!(!store.wal().has_entries());

    // "x" is gone, its id queued for reuse.
    assert!(store.get_vector(b"x").unwrap().is_none());
    assert_eq!(store.ids().deleted_ids().unwrap(), vec![2]);

    let outcome = store.insert("y", vector(&[(1, 0.5)]), None).unwrap();
    assert_eq!(outcome.doc_id, 2);
}

#[test]
fn filtered_search_combines_conditions() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    store
        .insert("cheap-tech", vector(&[(1, 0.9)]), Some(json!({"category": "Tech", "price": 5})))
        .unwrap();
    store
        .insert("dear-tech", vector(&[(1, 1.0)]), Some(json!({"category": "Tech", "price": 50})))
        .unwrap();
    store
        .insert("cheap-bill", vector(&[(1, 0.8)]), Some(json!({"category": "Billing", "price": 5})))
        .unwrap();

    let filter = json!([
        {"category": {"$eq": "Tech"}},
        {"price": {"$range": [0, 10]}},
    ]);
    let hits = store.search(&vector(&[(1, 1.0)]), 10, Some(&filter)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].external_id, b"cheap-tech".to_vec());
}

#[test]
fn search_results_are_sorted_and_bounded() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    for i in 1..=30u32 {
        store
            .insert(
                format!("doc-{i:02}"),
                vector(&[(1, i as f32 / 30.0)]),
                None,
            )
            .unwrap();
    }

    let hits = store.search(&vector(&[(1, 1.0)]), 5, None).unwrap();
    assert_eq!(hits.len(), 5);
    assert_eq!(hits[0].external_id, b"doc-30".to_vec());
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        store
            .insert("a", vector(&[(1, 1.0), (5, 0.5)]), Some(json!({"category": "Tech"})))
            .unwrap();
        store.insert("b", vector(&[(1, 0.25)]), Some(json!({"category": "Tech"}))).unwrap();
    }

    let store = open_store(&dir);
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(hit_keys(&store, &vector(&[(1, 1.0)]), 10), vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(
        store.filters().matching_count(&json!([{"category": {"$eq": "Tech"}}])).unwrap(),
        2
    );

    let restored = store.get_vector(b"a").unwrap().unwrap();
    assert_eq!(restored.indices(), vec![1, 5]);
}

#[test]
fn rejected_filter_fields_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);

    store.insert("a", vector(&[(1, 1.0)]), Some(json!({"price": 5}))).unwrap();
    let outcome = store
        .insert("b", vector(&[(1, 1.0)]), Some(json!({"price": "five", "tag": "ok"})))
        .unwrap();

    assert_eq!(outcome.rejected_fields.len(), 1);
    assert_eq!(outcome.rejected_fields[0].field, "price");
    assert_eq!(store.filters().matching_ids(&json!([{"tag": {"$eq": "ok"}}])).unwrap(), vec![2]);
}

#[test]
fn corrupt_block_list_fails_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.redb");
    {
        let store = SparseStore::open(RedbEngine::open(&path).unwrap(), dir.path().join("w")).unwrap();
        store.insert("a", vector(&[(1, 1.0)]), None).unwrap();
    }

    // Truncate a block-list value to a ragged length.
    {
        let engine = RedbEngine::open(&path).unwrap();
        let mut tx = engine.begin_write().unwrap();
        tx.put("term_blocks_index", &1u32.to_le_bytes(), &[1, 2, 3]).unwrap();
        tx.commit().unwrap();
    }

    let result = SparseStore::open(RedbEngine::open(&path).unwrap(), dir.path().join("w2"));
    assert!(matches!(result, Err(SparseError::Corrupt(_))));
}
