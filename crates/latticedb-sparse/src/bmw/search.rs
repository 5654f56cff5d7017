//! Document-at-a-time Block-Max WAND search.
//!
//! Each query term drives a stateful cursor over its block list. Cursors
//! carry indices into the cached [`BlockIdx`] list plus the decoded arrays
//! of the currently loaded block; they re-resolve through those indices on
//! every move rather than holding references into storage. The pivot loop
//! keeps cursors sorted by current doc id, accumulates per-term upper
//! bounds until they beat the current top-K threshold, and either scores
//! the pivot document or leapfrogs the lagging cursors past it.

use std::collections::BinaryHeap;

use roaring::RoaringBitmap;

use latticedb_core::{DocId, ScoredDoc, SparseVector};
use latticedb_storage::{StorageEngine, Transaction};

use crate::bmw::block::{decode_block_view, dequantize, BlockIdx, BlockView};
use crate::bmw::index::{find_block_pos, BmwIndex};
use crate::bmw::simd;
use crate::encoding::keys::{tables, term_block_key};
use crate::error::{SparseError, SparseResult};

/// A per-term traversal cursor.
struct TermCursor<'a> {
    term_id: u32,
    weight: f32,
    blocks: &'a [BlockIdx],
    /// Index of the block the cursor is positioned in.
    block_pos: usize,
    /// Decoded arrays of the current block; `None` before the block loads.
    view: Option<BlockView>,
    /// Entry index within the current block.
    entry: usize,
    /// Current doc id, `DocId::MAX` when exhausted.
    doc_id: DocId,
    /// Dequantized posting value at the current entry.
    value: f32,
}

impl<'a> TermCursor<'a> {
    fn new(term_id: u32, weight: f32, blocks: &'a [BlockIdx]) -> Self {
        Self {
            term_id,
            weight,
            blocks,
            block_pos: 0,
            view: None,
            entry: 0,
            doc_id: DocId::MAX,
            value: 0.0,
        }
    }

    /// Best possible contribution from the cursor's current block.
    fn upper_bound(&self) -> f32 {
        if self.block_pos >= self.blocks.len() {
            return 0.0;
        }
        self.weight * self.blocks[self.block_pos].max_value
    }

    /// Settle on the first live entry at or after the current position,
    /// loading blocks as the scan rolls off their ends.
    fn settle_on_live<T: Transaction>(&mut self, tx: &T) -> SparseResult<()> {
        loop {
            if self.block_pos >= self.blocks.len() {
                self.view = None;
                self.doc_id = DocId::MAX;
                self.value = 0.0;
                return Ok(());
            }

            if self.view.is_none() {
                self.view = Some(self.load_block(tx, self.blocks[self.block_pos].start_doc_id)?);
                self.entry = 0;
            }
            let view = self.view.as_ref().expect("loaded above");

            let n = view.values.len();
            let live = if self.entry < n && view.values[self.entry] != 0 {
                self.entry
            } else {
                simd::find_first_live(&view.values, self.entry)
            };

            if live < n {
                self.entry = live;
                self.doc_id = self.blocks[self.block_pos].start_doc_id + view.diffs.get(live);
                self.value = dequantize(view.values[live], view.max_value);
                return Ok(());
            }

            self.block_pos += 1;
            self.view = None;
        }
    }

    /// Step to the next live posting.
    fn step<T: Transaction>(&mut self, tx: &T) -> SparseResult<()> {
        self.entry += 1;
        self.settle_on_live(tx)
    }

    /// Advance to the first live posting with doc id `>= target`.
    fn advance<T: Transaction>(&mut self, tx: &T, target: DocId) -> SparseResult<()> {
        if self.doc_id >= target {
            return Ok(());
        }

        // Jump over whole blocks using the cached summaries.
        if self.block_pos + 1 < self.blocks.len()
            && self.blocks[self.block_pos + 1].start_doc_id <= target
        {
            if let Some(jumped) = find_block_pos(self.blocks, target) {
                if jumped != self.block_pos {
                    self.block_pos = jumped;
                    self.view = None;
                    self.entry = 0;
                }
            }
        }

        if self.view.is_none() {
            if self.block_pos >= self.blocks.len() {
                self.doc_id = DocId::MAX;
                self.value = 0.0;
                return Ok(());
            }
            self.view = Some(self.load_block(tx, self.blocks[self.block_pos].start_doc_id)?);
            self.entry = 0;
        }

        let start = self.blocks[self.block_pos].start_doc_id;
        if target > start {
            let view = self.view.as_ref().expect("loaded above");
            self.entry = view.diffs.find_first_ge(self.entry, target - start);
        }
        self.settle_on_live(tx)
    }

    fn load_block<T: Transaction>(&self, tx: &T, start_doc_id: DocId) -> SparseResult<BlockView> {
        let bytes = tx
            .get(tables::TERM_BLOCKS, &term_block_key(self.term_id, start_doc_id))?
            .ok_or_else(|| {
                SparseError::Internal(format!(
                    "block list names block (term {}, start {start_doc_id}) but the store has no such block",
                    self.term_id
                ))
            })?;
        decode_block_view(&bytes)
    }
}

/// Narrow a doc id to the candidate-bitmap domain.
#[cfg(feature = "id64")]
#[inline]
fn candidate_id(id: DocId) -> u32 {
    debug_assert!(id <= u64::from(u32::MAX), "candidate bitmaps require ids to fit 32 bits");
    id as u32
}

/// Narrow a doc id to the candidate-bitmap domain.
#[cfg(not(feature = "id64"))]
#[inline]
fn candidate_id(id: DocId) -> u32 {
    id
}

impl<E: StorageEngine> BmwIndex<E> {
    /// Top-K retrieval by dot product over terms shared with the query.
    ///
    /// With `candidates` set, only docs in the bitmap may enter the result;
    /// pruning still runs on the full index, so the bitmap narrows the
    /// output rather than the traversal.
    ///
    /// Results come back sorted by descending score, at most
    /// `min(k, matching docs)` of them.
    pub fn search(
        &self,
        query: &SparseVector,
        k: usize,
        candidates: Option<&RoaringBitmap>,
    ) -> SparseResult<Vec<ScoredDoc>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        // Hold the cache for the whole traversal so no writer swaps block
        // lists out from under the cursors.
        let cache = self.cache.read().map_err(|_| SparseError::LockPoisoned)?;
        let tx = self.engine().begin_read()?;

        let mut cursors: Vec<TermCursor<'_>> = Vec::with_capacity(query.nnz());
        for &(term_id, weight) in query.as_pairs() {
            if let Some(blocks) = cache.get(&term_id) {
                if !blocks.is_empty() {
                    let mut cursor = TermCursor::new(term_id, weight, blocks);
                    cursor.settle_on_live(&tx)?;
                    if cursor.doc_id != DocId::MAX {
                        cursors.push(cursor);
                    }
                }
            }
        }
        if cursors.is_empty() {
            return Ok(Vec::new());
        }

        let mut top_k: BinaryHeap<ScoredDoc> = BinaryHeap::with_capacity(k + 1);
        let mut threshold = 0.0f32;

        loop {
            cursors.sort_by_key(|c| c.doc_id);
            while cursors.last().is_some_and(|c| c.doc_id == DocId::MAX) {
                cursors.pop();
            }
            if cursors.is_empty() {
                break;
            }

            // Pivot: the first cursor at which the running sum of upper
            // bounds beats the threshold. No pivot means no remaining doc
            // can enter the top-K.
            let mut bound_sum = 0.0f32;
            let mut pivot = None;
            for (at, cursor) in cursors.iter().enumerate() {
                bound_sum += cursor.upper_bound();
                if bound_sum > threshold {
                    pivot = Some(at);
                    break;
                }
            }
            let Some(pivot) = pivot else {
                break;
            };
            let pivot_doc = cursors[pivot].doc_id;

            if cursors[0].doc_id == pivot_doc {
                // Everything up to the pivot sits on the candidate doc:
                // collect the full score and move those cursors past it.
                let mut score = 0.0f32;
                for cursor in cursors.iter_mut() {
                    if cursor.doc_id != pivot_doc {
                        break;
                    }
                    score += cursor.weight * cursor.value;
                    cursor.step(&tx)?;
                }

                let admitted =
                    candidates.map_or(true, |bitmap| bitmap.contains(candidate_id(pivot_doc)));
                if admitted {
                    if top_k.len() < k {
                        top_k.push(ScoredDoc::new(pivot_doc, score));
                        if top_k.len() == k {
                            threshold = top_k.peek().map_or(0.0, |worst| worst.score);
                        }
                    } else if score > threshold {
                        top_k.pop();
                        top_k.push(ScoredDoc::new(pivot_doc, score));
                        threshold = top_k.peek().map_or(0.0, |worst| worst.score);
                    }
                }
            } else {
                // The pivot is ahead: leapfrog the lagging cursors to it.
                for cursor in cursors[..pivot].iter_mut() {
                    cursor.advance(&tx, pivot_doc)?;
                }
            }
        }

        let mut results = top_k.into_vec();
        results.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}
