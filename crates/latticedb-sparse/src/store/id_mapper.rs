//! External-key to internal-id mapping with deleted-id reclamation.
//!
//! External ids are caller-supplied opaque byte strings; internal ids are
//! dense integers handed out by a monotonic allocator. Deleting a document
//! queues its internal id for reuse, and batch creation can drain that
//! queue before advancing the allocator.
//!
//! Allocation is crash-safe in cooperation with the [`IdWal`]: ids are
//! generated first (counter advance in its own committed transaction), the
//! WAL records them durably, and only then does the external→internal
//! mapping commit. A crash between the last two steps leaves WAL records
//! without mappings; recovery either completes those commits or reclaims
//! the ids.

use std::sync::{Arc, Mutex};

use latticedb_core::{doc_id_from_le, DocId, DOC_ID_BYTES};
use latticedb_storage::{Cursor, IdWal, StorageEngine, Transaction, WalOp, WalRecord};

use crate::encoding::keys::{doc_key, tables, DELETED_IDS_KEY, NEXT_ID_KEY};
use crate::error::{SparseError, SparseResult};

/// The first id the allocator hands out.
const START_ID: DocId = 1;

/// One resolved external id from a creation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedId {
    /// The internal id now bound to the external key.
    pub doc_id: DocId,
    /// Whether downstream indexes should treat this as a brand-new doc.
    /// Reused ids and pre-existing mappings are updates, not inserts.
    pub is_new_to_index: bool,
    /// Whether this batch created the mapping (fresh or reused id), as
    /// opposed to finding one already present.
    pub newly_mapped: bool,
}

/// String-key to numeric-id mapper.
pub struct IdMapper<E> {
    engine: Arc<E>,
    /// Serializes next-id counter advances.
    alloc_lock: Mutex<()>,
}

impl<E: StorageEngine> IdMapper<E> {
    /// Create a mapper on the given engine.
    #[must_use]
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine, alloc_lock: Mutex::new(()) }
    }

    /// Map a batch of external ids to internal ids, at most once per key.
    ///
    /// Keys already mapped keep their id and are flagged as not new. For
    /// the rest, ids come from the deleted-id queue first (when
    /// `reuse_deleted` is set), then from the monotonic allocator. Every id
    /// issued by this batch is logged to `wal` before the mapping commits.
    pub fn create_ids_batch(
        &self,
        external_ids: &[&[u8]],
        reuse_deleted: bool,
        wal: Option<&IdWal>,
    ) -> SparseResult<Vec<MappedId>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Resolve existing mappings on one snapshot.
        let mut resolved: Vec<Option<DocId>> = Vec::with_capacity(external_ids.len());
        {
            let tx = self.engine.begin_read()?;
            for external in external_ids {
                resolved.push(
                    tx.get(tables::ID_MAP, external)?
                        .as_deref()
                        .and_then(doc_id_from_le),
                );
            }
        }

        let needed = resolved.iter().filter(|id| id.is_none()).count();
        let mut reused = if reuse_deleted && needed > 0 {
            self.pop_deleted_ids(needed)?
        } else {
            Vec::new()
        };
        let mut fresh = self.allocate_fresh(needed - reused.len())?;

        // Durably record every issued id before the mapping commit; a crash
        // after this point is recoverable from the log.
        if let Some(wal) = wal {
            let records: Vec<WalRecord> = reused
                .iter()
                .chain(fresh.iter())
                .map(|&id| WalRecord::new(WalOp::VectorAdd, id))
                .collect();
            wal.append(&records)?;
        }

        let mut reused_queue = reused.drain(..);
        let mut fresh_queue = fresh.drain(..);

        let mut results = Vec::with_capacity(external_ids.len());
        let mut tx = self.engine.begin_write()?;
        for (external, existing) in external_ids.iter().zip(&resolved) {
            let mapped = match existing {
                Some(doc_id) => {
                    MappedId { doc_id: *doc_id, is_new_to_index: false, newly_mapped: false }
                }
                None => {
                    let (doc_id, is_reused) = match reused_queue.next() {
                        Some(id) => (id, true),
                        None => {
                            let id = fresh_queue.next().ok_or_else(|| {
                                SparseError::Internal(
                                    "id allocation ran short of the unresolved count".to_string(),
                                )
                            })?;
                            (id, false)
                        }
                    };
                    tx.put(tables::ID_MAP, external, &doc_id.to_le_bytes())?;
                    tx.put(tables::ID_MAP_REV, &doc_key(doc_id), external)?;
                    MappedId { doc_id, is_new_to_index: !is_reused, newly_mapped: true }
                }
            };
            results.push(mapped);
        }
        tx.commit()?;

        Ok(results)
    }

    /// Remove mappings for a batch of external ids inside the caller's
    /// transaction, queueing the freed ids for reuse. Unknown keys yield
    /// `0` at their position.
    pub fn delete_points_tx<T: Transaction>(
        &self,
        tx: &mut T,
        external_ids: &[&[u8]],
    ) -> SparseResult<Vec<DocId>> {
        let mut deleted = Vec::with_capacity(external_ids.len());
        for external in external_ids {
            match tx.get(tables::ID_MAP, external)?.as_deref().and_then(doc_id_from_le) {
                Some(doc_id) => {
                    tx.delete(tables::ID_MAP, external)?;
                    tx.delete(tables::ID_MAP_REV, &doc_key(doc_id))?;
                    deleted.push(doc_id);
                }
                None => deleted.push(0),
            }
        }

        let freed: Vec<DocId> = deleted.iter().copied().filter(|&id| id != 0).collect();
        Self::push_deleted_ids_tx(tx, &freed)?;
        Ok(deleted)
    }

    /// Remove mappings for a batch of external ids in one transaction.
    pub fn delete_points(&self, external_ids: &[&[u8]]) -> SparseResult<Vec<DocId>> {
        let mut tx = self.engine.begin_write()?;
        let deleted = self.delete_points_tx(&mut tx, external_ids)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Queue ids for reuse unconditionally. Used when an upstream write
    /// fails after ids were already issued.
    pub fn reclaim_failed_ids(&self, ids: &[DocId]) -> SparseResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.engine.begin_write()?;
        Self::push_deleted_ids_tx(&mut tx, ids)?;
        tx.commit()?;
        Ok(())
    }

    /// The internal id bound to an external key, if any.
    pub fn get_id(&self, external: &[u8]) -> SparseResult<Option<DocId>> {
        let tx = self.engine.begin_read()?;
        Ok(tx.get(tables::ID_MAP, external)?.as_deref().and_then(doc_id_from_le))
    }

    /// The external key bound to an internal id, if any.
    pub fn get_external(&self, doc_id: DocId) -> SparseResult<Option<Vec<u8>>> {
        let tx = self.engine.begin_read()?;
        Ok(tx.get(tables::ID_MAP_REV, &doc_key(doc_id))?)
    }

    /// Number of live mappings.
    pub fn count(&self) -> SparseResult<u64> {
        let tx = self.engine.begin_read()?;
        let mut cursor = tx.cursor(tables::ID_MAP)?;
        let mut count = 0u64;
        while cursor.next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// The current deleted-id queue, oldest first.
    pub fn deleted_ids(&self) -> SparseResult<Vec<DocId>> {
        let tx = self.engine.begin_read()?;
        match tx.get(tables::ID_META, DELETED_IDS_KEY)? {
            Some(bytes) => decode_id_array(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// The next id the allocator will hand out.
    pub fn next_id(&self) -> SparseResult<DocId> {
        let tx = self.engine.begin_read()?;
        Ok(tx
            .get(tables::ID_META, NEXT_ID_KEY)?
            .as_deref()
            .and_then(doc_id_from_le)
            .unwrap_or(START_ID))
    }

    /// Advance the counter by `count` in its own committed transaction and
    /// return the issued range.
    fn allocate_fresh(&self, count: usize) -> SparseResult<Vec<DocId>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.alloc_lock.lock().map_err(|_| SparseError::LockPoisoned)?;

        let mut tx = self.engine.begin_write()?;
        let current = tx
            .get(tables::ID_META, NEXT_ID_KEY)?
            .as_deref()
            .and_then(doc_id_from_le)
            .unwrap_or(START_ID);
        let next = current + count as DocId;
        tx.put(tables::ID_META, NEXT_ID_KEY, &next.to_le_bytes())?;
        tx.commit()?;

        Ok((current..next).collect())
    }

    /// Pop up to `max` ids from the deleted-id queue, oldest first.
    fn pop_deleted_ids(&self, max: usize) -> SparseResult<Vec<DocId>> {
        let mut tx = self.engine.begin_write()?;
        let Some(bytes) = tx.get(tables::ID_META, DELETED_IDS_KEY)? else {
            return Ok(Vec::new());
        };
        let mut ids = decode_id_array(&bytes)?;

        let taken: Vec<DocId> = ids.drain(..max.min(ids.len())).collect();
        if ids.is_empty() {
            tx.delete(tables::ID_META, DELETED_IDS_KEY)?;
        } else {
            tx.put(tables::ID_META, DELETED_IDS_KEY, &encode_id_array(&ids))?;
        }
        tx.commit()?;
        Ok(taken)
    }

    /// Append ids to the deleted-id queue inside the caller's transaction.
    fn push_deleted_ids_tx<T: Transaction>(tx: &mut T, ids: &[DocId]) -> SparseResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut queue = match tx.get(tables::ID_META, DELETED_IDS_KEY)? {
            Some(bytes) => decode_id_array(&bytes)?,
            None => Vec::new(),
        };
        queue.extend_from_slice(ids);
        tx.put(tables::ID_META, DELETED_IDS_KEY, &encode_id_array(&queue))?;
        Ok(())
    }
}

/// Pack an id array as consecutive `uN le` values.
fn encode_id_array(ids: &[DocId]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ids.len() * DOC_ID_BYTES);
    for id in ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    bytes
}

/// Unpack a `uN le` id array.
fn decode_id_array(bytes: &[u8]) -> SparseResult<Vec<DocId>> {
    if bytes.len() % DOC_ID_BYTES != 0 {
        return Err(SparseError::Corrupt(format!(
            "deleted-id list length {} is not a multiple of {DOC_ID_BYTES}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(DOC_ID_BYTES)
        .filter_map(doc_id_from_le)
        .collect())
}
