//! Per-document persistence: packed vectors and filter payloads.
//!
//! The `docs` sub-store holds each document's packed sparse vector; the
//! `payloads` sub-store keeps the filter payload JSON so updates and
//! deletes can unwind the bitmap/numeric entries the payload created.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use latticedb_core::encoding::sparse as sparse_codec;
use latticedb_core::{DocId, SparseVector};
use latticedb_storage::{StorageEngine, Transaction};

use crate::encoding::keys::{doc_key, tables};
use crate::error::{SparseError, SparseResult};

/// Document record store.
pub struct DocStore<E> {
    engine: Arc<E>,
}

impl<E: StorageEngine> DocStore<E> {
    /// Create a document store on the given engine.
    #[must_use]
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Write a document's packed vector.
    pub fn put_vector_tx<T: Transaction>(
        tx: &mut T,
        doc_id: DocId,
        vector: &SparseVector,
    ) -> SparseResult<()> {
        tx.put(tables::DOCS, &doc_key(doc_id), &sparse_codec::pack(vector))?;
        Ok(())
    }

    /// Read a document's vector back.
    pub fn get_vector_tx<T: Transaction>(
        tx: &T,
        doc_id: DocId,
    ) -> SparseResult<Option<SparseVector>> {
        match tx.get(tables::DOCS, &doc_key(doc_id))? {
            Some(bytes) => Ok(Some(sparse_codec::unpack(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a document's vector. Returns whether it existed.
    pub fn delete_vector_tx<T: Transaction>(tx: &mut T, doc_id: DocId) -> SparseResult<bool> {
        Ok(tx.delete(tables::DOCS, &doc_key(doc_id))?)
    }

    /// Write a document's filter payload.
    pub fn put_payload_tx<T: Transaction>(
        tx: &mut T,
        doc_id: DocId,
        payload: &JsonValue,
    ) -> SparseResult<()> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| SparseError::Internal(format!("payload serialization: {e}")))?;
        tx.put(tables::PAYLOADS, &doc_key(doc_id), &bytes)?;
        Ok(())
    }

    /// Read a document's filter payload back.
    pub fn get_payload_tx<T: Transaction>(
        tx: &T,
        doc_id: DocId,
    ) -> SparseResult<Option<JsonValue>> {
        match tx.get(tables::PAYLOADS, &doc_key(doc_id))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SparseError::Corrupt(format!("stored payload: {e}"))),
            None => Ok(None),
        }
    }

    /// Delete a document's filter payload.
    pub fn delete_payload_tx<T: Transaction>(tx: &mut T, doc_id: DocId) -> SparseResult<()> {
        tx.delete(tables::PAYLOADS, &doc_key(doc_id))?;
        Ok(())
    }

    /// Read a document's vector on a fresh snapshot.
    pub fn get_vector(&self, doc_id: DocId) -> SparseResult<Option<SparseVector>> {
        let tx = self.engine.begin_read()?;
        Self::get_vector_tx(&tx, doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticedb_storage::backends::RedbEngine;
    use serde_json::json;

    fn store() -> DocStore<RedbEngine> {
        DocStore::new(Arc::new(RedbEngine::in_memory().unwrap()))
    }

    #[test]
    fn vector_roundtrip() {
        let s = store();
        let vector = SparseVector::new(vec![(1, 0.5), (9, 0.25)]).unwrap();

        let mut tx = s.engine.begin_write().unwrap();
        DocStore::<RedbEngine>::put_vector_tx(&mut tx, 3, &vector).unwrap();
        tx.commit().unwrap();

        let restored = s.get_vector(3).unwrap().unwrap();
        assert_eq!(restored.indices(), vector.indices());
        assert!(s.get_vector(4).unwrap().is_none());
    }

    #[test]
    fn payload_roundtrip() {
        let s = store();
        let payload = json!({"category": "Billing", "price": 5});

        let mut tx = s.engine.begin_write().unwrap();
        DocStore::<RedbEngine>::put_payload_tx(&mut tx, 3, &payload).unwrap();
        tx.commit().unwrap();

        let tx = s.engine.begin_read().unwrap();
        assert_eq!(DocStore::<RedbEngine>::get_payload_tx(&tx, 3).unwrap(), Some(payload));
        assert_eq!(DocStore::<RedbEngine>::get_payload_tx(&tx, 4).unwrap(), None);
    }

    #[test]
    fn corrupt_vector_surfaces() {
        let s = store();
        let mut tx = s.engine.begin_write().unwrap();
        tx.put(tables::DOCS, &doc_key(1), &[5, 0, 1]).unwrap();
        tx.commit().unwrap();

        assert!(matches!(s.get_vector(1), Err(SparseError::Core(_))));
    }
}
