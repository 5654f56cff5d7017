//! Block-Max WAND inverted index over sparse term postings.
//!
//! Postings for a term are grouped into blocks of docs sharing a
//! `start_doc_id`; each block stores doc-id diffs at the narrowest width
//! that fits and values quantized to a byte against the block's maximum.
//! A per-term list of `(start_doc_id, block_max_value)` summaries — cached
//! in memory — lets the search skip whole blocks whose best possible
//! contribution cannot reach the current top-K threshold.

mod block;
mod index;
mod search;
pub mod simd;

pub use block::{
    decode_block_entries, decode_block_view, dequantize, encode_block, quantize, BlockDiffs,
    BlockEntry, BlockIdx, BlockView, BLOCK_TARGET_SIZE, BLOCK_VERSION, HEADER_LEN, MAX_U16_DIFF,
    SPLIT_THRESHOLD,
};
pub use index::{BmwIndex, CachePatch};
