//! The sparse store: one façade tying ids, documents, postings and filters
//! together with transactional write paths and filtered search.

mod doc_store;
mod id_mapper;

pub use doc_store::DocStore;
pub use id_mapper::{IdMapper, MappedId};

use std::path::Path;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use latticedb_core::{DocId, ScoredDoc, SparseVector};
use latticedb_storage::{IdWal, StorageEngine, Transaction, WalOp, WalRecord};

use crate::bmw::BmwIndex;
use crate::encoding::keys::{doc_key, tables};
use crate::error::SparseResult;
use crate::filter::{FilterEngine, RejectedField};

/// One document to insert or update.
#[derive(Debug, Clone)]
pub struct InsertItem {
    /// Caller-supplied opaque key, unique per store.
    pub external_id: Vec<u8>,
    /// The document's sparse vector.
    pub vector: SparseVector,
    /// Optional filter payload: a JSON object of `field: value` entries.
    pub payload: Option<JsonValue>,
}

/// The result of inserting one document.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// The internal id now bound to the document.
    pub doc_id: DocId,
    /// Whether an existing document was rewritten rather than created.
    pub updated: bool,
    /// Filter fields that were skipped, with reasons.
    pub rejected_fields: Vec<RejectedField>,
}

/// A search hit translated back to the caller's key space.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The external key of the matching document.
    pub external_id: Vec<u8>,
    /// The dot-product score.
    pub score: f32,
}

/// What recovery found in the write-ahead log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Ids whose writes had fully landed before the crash.
    pub completed: Vec<DocId>,
    /// Ids that were issued but never (fully) committed; their partial
    /// state was rolled back and the ids queued for reuse.
    pub reclaimed: Vec<DocId>,
}

/// Persistent sparse-vector store with filtered top-K search.
pub struct SparseStore<E: StorageEngine> {
    engine: Arc<E>,
    ids: IdMapper<E>,
    docs: DocStore<E>,
    bmw: BmwIndex<E>,
    filters: FilterEngine<E>,
    wal: IdWal,
}

impl<E: StorageEngine> SparseStore<E> {
    /// Open the store on an engine, with the id WAL at `wal_path`.
    pub fn open(engine: E, wal_path: impl AsRef<Path>) -> SparseResult<Self> {
        let engine = Arc::new(engine);
        Ok(Self {
            ids: IdMapper::new(Arc::clone(&engine)),
            docs: DocStore::new(Arc::clone(&engine)),
            bmw: BmwIndex::open(Arc::clone(&engine))?,
            filters: FilterEngine::open(Arc::clone(&engine))?,
            wal: IdWal::open(wal_path)?,
            engine,
        })
    }

    /// The id mapper.
    #[must_use]
    pub fn ids(&self) -> &IdMapper<E> {
        &self.ids
    }

    /// The BMW index.
    #[must_use]
    pub fn bmw(&self) -> &BmwIndex<E> {
        &self.bmw
    }

    /// The filter engine.
    #[must_use]
    pub fn filters(&self) -> &FilterEngine<E> {
        &self.filters
    }

    /// The id write-ahead log.
    #[must_use]
    pub fn wal(&self) -> &IdWal {
        &self.wal
    }

    /// Insert one document.
    pub fn insert(
        &self,
        external_id: impl Into<Vec<u8>>,
        vector: SparseVector,
        payload: Option<JsonValue>,
    ) -> SparseResult<InsertOutcome> {
        let mut outcomes = self.insert_batch(vec![InsertItem {
            external_id: external_id.into(),
            vector,
            payload,
        }])?;
        Ok(outcomes.remove(0))
    }

    /// Insert a batch of documents.
    ///
    /// Ids are assigned first (reusing deleted ids, logged to the WAL);
    /// then every document record, posting and filter entry of the batch is
    /// written in a single transaction. Existing external ids are updates:
    /// their old postings are tombstoned and their old filter entries
    /// dropped inside the same transaction.
    ///
    /// If the transaction fails after ids were issued, the fresh mappings
    /// are rolled back and the ids queued for reuse before the error is
    /// returned.
    pub fn insert_batch(&self, items: Vec<InsertItem>) -> SparseResult<Vec<InsertOutcome>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let external_refs: Vec<&[u8]> =
            items.iter().map(|item| item.external_id.as_slice()).collect();
        let mapped = self.ids.create_ids_batch(&external_refs, true, Some(&self.wal))?;

        // Rewrites of existing docs are updates in the id lifecycle log.
        let updates: Vec<WalRecord> = mapped
            .iter()
            .filter(|m| !m.newly_mapped)
            .map(|m| WalRecord::new(WalOp::VectorUpdate, m.doc_id))
            .collect();
        self.wal.append(&updates)?;

        match self.write_documents(&items, &mapped) {
            Ok(outcomes) => Ok(outcomes),
            Err(err) => {
                self.undo_failed_batch(&external_refs, &mapped);
                Err(err)
            }
        }
    }

    /// Write a whole batch in one transaction and publish the BMW cache
    /// patch after commit.
    fn write_documents(
        &self,
        items: &[InsertItem],
        mapped: &[MappedId],
    ) -> SparseResult<Vec<InsertOutcome>> {
        let mut tx = self.engine.begin_write()?;
        let mut outcomes = Vec::with_capacity(items.len());

        // Tombstone old postings and drop old filter entries before any of
        // the batch's inserts touch the same blocks.
        for m in mapped.iter().filter(|m| !m.newly_mapped) {
            if let Some(old_vector) = DocStore::<E>::get_vector_tx(&tx, m.doc_id)? {
                self.bmw.remove_doc_tx(&mut tx, m.doc_id, &old_vector)?;
            }
            if let Some(old_payload) = DocStore::<E>::get_payload_tx(&tx, m.doc_id)? {
                self.filters.remove_payload_tx(&mut tx, m.doc_id, &old_payload)?;
                DocStore::<E>::delete_payload_tx(&mut tx, m.doc_id)?;
            }
        }

        for (item, m) in items.iter().zip(mapped) {
            DocStore::<E>::put_vector_tx(&mut tx, m.doc_id, &item.vector)?;

            let mut rejected = Vec::new();
            if let Some(payload) = &item.payload {
                rejected = self.filters.apply_payload_tx(&mut tx, m.doc_id, payload)?;
                DocStore::<E>::put_payload_tx(&mut tx, m.doc_id, payload)?;
            }

            outcomes.push(InsertOutcome {
                doc_id: m.doc_id,
                updated: !m.newly_mapped,
                rejected_fields: rejected,
            });
        }

        let postings: Vec<(DocId, &SparseVector)> = items
            .iter()
            .zip(mapped)
            .map(|(item, m)| (m.doc_id, &item.vector))
            .collect();
        let patch = self.bmw.add_batch_tx(&mut tx, &postings)?;

        tx.commit()?;
        self.bmw.apply(patch)?;
        Ok(outcomes)
    }

    /// Best-effort cleanup after a failed batch: unmap the ids this batch
    /// created and queue them for reuse, keeping the live-mapping /
    /// deleted-list disjointness invariant.
    fn undo_failed_batch(&self, external_refs: &[&[u8]], mapped: &[MappedId]) {
        let fresh: Vec<(&[u8], DocId)> = external_refs
            .iter()
            .zip(mapped)
            .filter(|(_, m)| m.newly_mapped)
            .map(|(external, m)| (*external, m.doc_id))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let unmap = || -> SparseResult<()> {
            let mut tx = self.engine.begin_write()?;
            for &(external, doc_id) in &fresh {
                tx.delete(tables::ID_MAP, external)?;
                tx.delete(tables::ID_MAP_REV, &doc_key(doc_id))?;
            }
            tx.commit()?;
            let ids: Vec<DocId> = fresh.iter().map(|&(_, id)| id).collect();
            self.ids.reclaim_failed_ids(&ids)
        };
        if let Err(cleanup_err) = unmap() {
            warn!(error = %cleanup_err, "failed to reclaim ids of a failed batch");
        }
    }

    /// Delete documents by external id.
    ///
    /// Unknown keys yield `0` at their position. Postings are tombstoned,
    /// filter entries and records removed, and the ids queued for reuse,
    /// all in one transaction.
    pub fn delete(&self, external_ids: &[&[u8]]) -> SparseResult<Vec<DocId>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.engine.begin_write()?;
        let deleted = self.ids.delete_points_tx(&mut tx, external_ids)?;

        for &doc_id in deleted.iter().filter(|&&id| id != 0) {
            if let Some(vector) = DocStore::<E>::get_vector_tx(&tx, doc_id)? {
                self.bmw.remove_doc_tx(&mut tx, doc_id, &vector)?;
                DocStore::<E>::delete_vector_tx(&mut tx, doc_id)?;
            }
            if let Some(payload) = DocStore::<E>::get_payload_tx(&tx, doc_id)? {
                self.filters.remove_payload_tx(&mut tx, doc_id, &payload)?;
                DocStore::<E>::delete_payload_tx(&mut tx, doc_id)?;
            }
        }

        let records: Vec<WalRecord> = deleted
            .iter()
            .filter(|&&id| id != 0)
            .map(|&id| WalRecord::new(WalOp::VectorDelete, id))
            .collect();
        self.wal.append(&records)?;

        tx.commit()?;
        Ok(deleted)
    }

    /// Top-K search, optionally narrowed by a filter condition list.
    ///
    /// Hits come back as external keys with descending scores.
    pub fn search(
        &self,
        query: &SparseVector,
        k: usize,
        filter: Option<&JsonValue>,
    ) -> SparseResult<Vec<SearchHit>> {
        let candidates = match filter {
            Some(conditions) => Some(self.filters.compute_bitmap(conditions)?),
            None => None,
        };

        let scored = self.bmw.search(query, k, candidates.as_ref())?;

        let mut hits = Vec::with_capacity(scored.len());
        for ScoredDoc { doc_id, score } in scored {
            match self.ids.get_external(doc_id)? {
                Some(external_id) => hits.push(SearchHit { external_id, score }),
                // A hit without a mapping means its delete raced this
                // search's snapshot; drop it rather than invent a key.
                None => warn!(doc_id, "search hit has no external mapping"),
            }
        }
        Ok(hits)
    }

    /// A document's vector by external id.
    pub fn get_vector(&self, external_id: &[u8]) -> SparseResult<Option<SparseVector>> {
        match self.ids.get_id(external_id)? {
            Some(doc_id) => self.docs.get_vector(doc_id),
            None => Ok(None),
        }
    }

    /// Number of live documents.
    pub fn len(&self) -> SparseResult<u64> {
        self.ids.count()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> SparseResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Inspect the WAL after a restart and repair interrupted batches.
    ///
    /// Ids whose `VectorAdd` never reached a committed document are rolled
    /// back (mapping removed if it landed) and queued for reuse; fully
    /// committed ids are reported as such. The log is cleared afterwards.
    pub fn recover(&self) -> SparseResult<RecoveryReport> {
        if !self.wal.has_entries() {
            return Ok(RecoveryReport::default());
        }

        let mut report = RecoveryReport::default();
        let mut tx = self.engine.begin_write()?;
        for record in self.wal.read_records()? {
            if record.op != WalOp::VectorAdd {
                continue;
            }
            let doc_id = record.doc_id;
            let external = tx.get(tables::ID_MAP_REV, &doc_key(doc_id))?;
            let has_doc = tx.get(tables::DOCS, &doc_key(doc_id))?.is_some();

            match (external, has_doc) {
                (Some(_), true) => report.completed.push(doc_id),
                (Some(external), false) => {
                    // Mapping committed but the document batch never did.
                    tx.delete(tables::ID_MAP, &external)?;
                    tx.delete(tables::ID_MAP_REV, &doc_key(doc_id))?;
                    report.reclaimed.push(doc_id);
                }
                (None, _) => report.reclaimed.push(doc_id),
            }
        }
        tx.commit()?;

        // The same id can appear in several records across its lifecycle;
        // queue it once.
        report.reclaimed.sort_unstable();
        report.reclaimed.dedup();
        if !report.reclaimed.is_empty() {
            warn!(count = report.reclaimed.len(), "reclaimed ids from interrupted batches");
            self.ids.reclaim_failed_ids(&report.reclaimed)?;
        }
        self.wal.clear()?;
        Ok(report)
    }
}
