//! BMW index: block placement, splits, tombstones, and the block-list cache.
//!
//! Two sub-stores hold the index:
//!
//! - `term_blocks_index`: `term_id` → packed [`BlockIdx`] list, strictly
//!   ascending by `start_doc_id` and non-overlapping (a block owns
//!   `[start_doc_id, next_start)`, the last to infinity).
//! - `term_blocks`: `(term_id, start_doc_id)` → block record.
//!
//! The block lists are also cached in memory, loaded by a full scan at
//! startup; this cache is the authoritative source for block boundaries and
//! per-block upper bounds during search. Writers never mutate it directly:
//! they stage copy-on-write lists per touched term, persist them inside the
//! caller's transaction, and hand back a [`CachePatch`] the caller applies
//! only after the transaction commits. An aborted transaction therefore
//! leaves the cache exactly as it was.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use latticedb_core::{DocId, SparseVector};
use latticedb_storage::{Cursor, StorageEngine, Transaction};

use crate::bmw::block::{
    decode_block_entries, encode_block, BlockEntry, BlockIdx, MAX_U16_DIFF, SPLIT_THRESHOLD,
};
use crate::encoding::keys::{decode_term_index_key, tables, term_block_key, term_index_key};
use crate::error::{SparseError, SparseResult};

/// Staged block-list updates, applied to the cache after commit.
#[derive(Debug, Default)]
pub struct CachePatch {
    terms: HashMap<u32, Vec<BlockIdx>>,
}

impl CachePatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Block-Max WAND inverted index.
pub struct BmwIndex<E> {
    engine: Arc<E>,
    /// `term_id` → block list; guarded for the full duration of a search.
    pub(crate) cache: RwLock<HashMap<u32, Vec<BlockIdx>>>,
}

impl<E: StorageEngine> BmwIndex<E> {
    /// Open the index, loading every term's block list into the cache.
    pub fn open(engine: Arc<E>) -> SparseResult<Self> {
        let mut cache = HashMap::new();
        {
            let tx = engine.begin_read()?;
            let mut cursor = tx.cursor(tables::TERM_BLOCKS_INDEX)?;
            while let Some((key, value)) = cursor.next()? {
                let Some(term_id) = decode_term_index_key(&key) else {
                    return Err(SparseError::Corrupt(format!(
                        "term index key of length {}",
                        key.len()
                    )));
                };
                cache.insert(term_id, BlockIdx::decode_list(&value)?);
            }
        }
        debug!(terms = cache.len(), "loaded BMW block-list cache");
        Ok(Self { engine, cache: RwLock::new(cache) })
    }

    /// The storage engine this index writes through.
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Number of terms with at least one block.
    pub fn term_count(&self) -> SparseResult<usize> {
        Ok(self.cache.read().map_err(|_| SparseError::LockPoisoned)?.len())
    }

    /// Total number of blocks across all terms.
    pub fn block_count(&self) -> SparseResult<usize> {
        Ok(self
            .cache
            .read()
            .map_err(|_| SparseError::LockPoisoned)?
            .values()
            .map(Vec::len)
            .sum())
    }

    /// The cached block list for a term, cloned.
    pub fn blocks_of(&self, term_id: u32) -> SparseResult<Vec<BlockIdx>> {
        Ok(self
            .cache
            .read()
            .map_err(|_| SparseError::LockPoisoned)?
            .get(&term_id)
            .cloned()
            .unwrap_or_default())
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Insert a batch of documents' postings inside the caller's
    /// transaction. Returns the cache patch to apply after commit.
    pub fn add_batch_tx<T: Transaction>(
        &self,
        tx: &mut T,
        docs: &[(DocId, &SparseVector)],
    ) -> SparseResult<CachePatch> {
        // Group postings by term so each term's blocks are loaded once and
        // walked in ascending doc order.
        let mut term_updates: BTreeMap<u32, Vec<(DocId, f32)>> = BTreeMap::new();
        for &(doc_id, vector) in docs {
            for &(term_id, value) in vector.as_pairs() {
                term_updates.entry(term_id).or_default().push((doc_id, value));
            }
        }

        let mut patch = CachePatch::default();
        for (term_id, mut updates) in term_updates {
            updates.sort_unstable_by_key(|&(doc_id, _)| doc_id);

            let mut blocks = self.blocks_of(term_id)?;
            for (doc_id, value) in updates {
                self.add_to_block(tx, term_id, doc_id, value, &mut blocks)?;
            }
            tx.put(
                tables::TERM_BLOCKS_INDEX,
                &term_index_key(term_id),
                &BlockIdx::encode_list(&blocks),
            )?;
            patch.terms.insert(term_id, blocks);
        }
        Ok(patch)
    }

    /// Tombstone a document's postings inside the caller's transaction.
    ///
    /// Entries keep their diffs (block layout is stable); only their values
    /// drop to zero. Block lists do not change, so no cache patch results:
    /// the cached per-block maxima merely become looser upper bounds.
    pub fn remove_doc_tx<T: Transaction>(
        &self,
        tx: &mut T,
        doc_id: DocId,
        vector: &SparseVector,
    ) -> SparseResult<()> {
        for &(term_id, _) in vector.as_pairs() {
            self.remove_from_block(tx, term_id, doc_id)?;
        }
        Ok(())
    }

    /// Publish staged block lists to the cache. Call only after the
    /// transaction that produced the patch has committed.
    pub fn apply(&self, patch: CachePatch) -> SparseResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut cache = self.cache.write().map_err(|_| SparseError::LockPoisoned)?;
        for (term_id, blocks) in patch.terms {
            cache.insert(term_id, blocks);
        }
        Ok(())
    }

    /// Insert one posting, splitting or creating blocks as needed.
    fn add_to_block<T: Transaction>(
        &self,
        tx: &mut T,
        term_id: u32,
        doc_id: DocId,
        value: f32,
        blocks: &mut Vec<BlockIdx>,
    ) -> SparseResult<()> {
        let pos = find_block_pos(blocks, doc_id);

        // A doc too far past the block start would force a wide diff; start
        // a fresh block instead so 16-bit diffs stay the common case.
        let force_new =
            matches!(pos, Some(p) if doc_id - blocks[p].start_doc_id > MAX_U16_DIFF);

        let Some(pos) = pos.filter(|_| !force_new) else {
            let at = match pos {
                Some(p) => p + 1,
                None => 0,
            };
            blocks.insert(at, BlockIdx::new(doc_id, value));
            let (bytes, _) = encode_block(&[BlockEntry::new(0, value)]);
            tx.put(tables::TERM_BLOCKS, &term_block_key(term_id, doc_id), &bytes)?;
            return Ok(());
        };

        let start = blocks[pos].start_doc_id;
        let mut entries = self.load_block(tx, term_id, start)?;

        let diff = doc_id - start;
        let at = entries.partition_point(|e| e.doc_diff < diff);
        if at < entries.len() && entries[at].doc_diff == diff {
            entries[at].value = value;
        } else {
            entries.insert(at, BlockEntry::new(diff, value));
        }

        if entries.len() > SPLIT_THRESHOLD {
            return self.split_block(tx, term_id, blocks, pos, entries);
        }

        let (bytes, max_value) = encode_block(&entries);
        tx.put(tables::TERM_BLOCKS, &term_block_key(term_id, start), &bytes)?;
        if max_value > blocks[pos].max_value {
            blocks[pos].max_value = max_value;
        }
        Ok(())
    }

    /// Split a block at its median diff. The second half re-anchors its
    /// diffs to a new `start_doc_id` and both halves recompute their maxima.
    fn split_block<T: Transaction>(
        &self,
        tx: &mut T,
        term_id: u32,
        blocks: &mut Vec<BlockIdx>,
        pos: usize,
        mut entries: Vec<BlockEntry>,
    ) -> SparseResult<()> {
        let start = blocks[pos].start_doc_id;
        let mid = entries.len() / 2;

        let upper = entries.split_off(mid);
        let base_diff = upper[0].doc_diff;
        let new_start = start + base_diff;
        let upper: Vec<BlockEntry> = upper
            .into_iter()
            .map(|e| BlockEntry::new(e.doc_diff - base_diff, e.value))
            .collect();

        let (lower_bytes, lower_max) = encode_block(&entries);
        tx.put(tables::TERM_BLOCKS, &term_block_key(term_id, start), &lower_bytes)?;
        blocks[pos].max_value = lower_max;

        let (upper_bytes, upper_max) = encode_block(&upper);
        tx.put(tables::TERM_BLOCKS, &term_block_key(term_id, new_start), &upper_bytes)?;
        blocks.insert(pos + 1, BlockIdx::new(new_start, upper_max));

        debug!(term_id, start, new_start, "split BMW block");
        Ok(())
    }

    /// Tombstone one posting. Returns whether an entry was found.
    fn remove_from_block<T: Transaction>(
        &self,
        tx: &mut T,
        term_id: u32,
        doc_id: DocId,
    ) -> SparseResult<bool> {
        let blocks = self.blocks_of(term_id)?;
        let Some(pos) = find_block_pos(&blocks, doc_id) else {
            return Ok(false);
        };

        let start = blocks[pos].start_doc_id;
        let mut entries = self.load_block(tx, term_id, start)?;

        let diff = doc_id - start;
        let at = entries.partition_point(|e| e.doc_diff < diff);
        if at >= entries.len() || entries[at].doc_diff != diff {
            return Ok(false);
        }
        entries[at].value = 0.0;

        let (bytes, _) = encode_block(&entries);
        tx.put(tables::TERM_BLOCKS, &term_block_key(term_id, start), &bytes)?;
        Ok(true)
    }

    /// Load a listed block's entries. A listed block that is missing from
    /// the store is an internal inconsistency, not a recoverable state.
    fn load_block<T: Transaction>(
        &self,
        tx: &T,
        term_id: u32,
        start_doc_id: DocId,
    ) -> SparseResult<Vec<BlockEntry>> {
        let bytes = tx
            .get(tables::TERM_BLOCKS, &term_block_key(term_id, start_doc_id))?
            .ok_or_else(|| {
                SparseError::Internal(format!(
                    "block list names block (term {term_id}, start {start_doc_id}) but the store has no such block"
                ))
            })?;
        decode_block_entries(&bytes)
    }
}

/// Index of the block owning `doc_id`: the last block whose start is at or
/// below it. `None` when the doc precedes every block (or there are none).
pub(crate) fn find_block_pos(blocks: &[BlockIdx], doc_id: DocId) -> Option<usize> {
    blocks.partition_point(|b| b.start_doc_id <= doc_id).checked_sub(1)
}
