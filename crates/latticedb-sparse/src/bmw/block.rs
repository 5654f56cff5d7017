//! Block layout, quantization and the split rule.
//!
//! # On-disk block
//!
//! ```text
//! header (16 bytes):
//!   version:u8  diff_bits:u8  n:u16le  live_count:u16le  padding:u16le
//!   block_max_value:f32le  alignment_pad:u32le
//! payload (structure-of-arrays):
//!   doc_diffs[n] at diff_bits/8 bytes each, strictly ascending
//!   values[n]:u8, quantized against block_max_value; 0 marks a tombstone
//! ```
//!
//! The stored doc id of an entry is `start_doc_id + doc_diff`, with the
//! block's `start_doc_id` carried by its key and by the per-term
//! [`BlockIdx`] list. Diffs are written at the narrowest of {16, 32, 64}
//! bits that holds the largest diff (64 only in `id64` builds).

use latticedb_core::{DocId, DOC_ID_BYTES};

use crate::error::{SparseError, SparseResult};
use crate::bmw::simd;

/// Block format version.
pub const BLOCK_VERSION: u8 = 3;

/// Entry count that triggers a split on insert.
pub const SPLIT_THRESHOLD: usize = 160;

/// Nominal block size after a split.
pub const BLOCK_TARGET_SIZE: usize = 128;

/// Serialized header length.
pub const HEADER_LEN: usize = 16;

/// Largest doc-diff a 16-bit block can hold.
pub const MAX_U16_DIFF: DocId = 65_535;

/// Per-term block summary: where the block starts and the best value in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockIdx {
    /// First doc id the block owns.
    pub start_doc_id: DocId,
    /// Upper bound on the values stored in the block.
    pub max_value: f32,
}

impl BlockIdx {
    /// Serialized size of one summary.
    pub const LEN: usize = DOC_ID_BYTES + 4;

    /// Create a summary.
    #[must_use]
    pub const fn new(start_doc_id: DocId, max_value: f32) -> Self {
        Self { start_doc_id, max_value }
    }

    /// Pack a block list as `[start:uN le, max:f32 le]*`.
    #[must_use]
    pub fn encode_list(blocks: &[Self]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(blocks.len() * Self::LEN);
        for block in blocks {
            bytes.extend_from_slice(&block.start_doc_id.to_le_bytes());
            bytes.extend_from_slice(&block.max_value.to_le_bytes());
        }
        bytes
    }

    /// Decode a packed block list.
    ///
    /// # Errors
    ///
    /// Returns [`SparseError::Corrupt`] when the length is not a multiple of
    /// the summary size.
    pub fn decode_list(bytes: &[u8]) -> SparseResult<Vec<Self>> {
        if bytes.len() % Self::LEN != 0 {
            return Err(SparseError::Corrupt(format!(
                "block list length {} is not a multiple of {}",
                bytes.len(),
                Self::LEN
            )));
        }
        let mut blocks = Vec::with_capacity(bytes.len() / Self::LEN);
        for chunk in bytes.chunks_exact(Self::LEN) {
            let id_bytes: [u8; DOC_ID_BYTES] =
                chunk[..DOC_ID_BYTES].try_into().expect("chunk length is fixed");
            let max_bytes: [u8; 4] =
                chunk[DOC_ID_BYTES..].try_into().expect("chunk length is fixed");
            blocks.push(Self::new(DocId::from_le_bytes(id_bytes), f32::from_le_bytes(max_bytes)));
        }
        Ok(blocks)
    }
}

/// An in-memory block entry with its dequantized value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockEntry {
    /// Offset from the block's `start_doc_id`.
    pub doc_diff: DocId,
    /// Posting value; `0.0` is a tombstone.
    pub value: f32,
}

impl BlockEntry {
    /// Create an entry.
    #[must_use]
    pub const fn new(doc_diff: DocId, value: f32) -> Self {
        Self { doc_diff, value }
    }
}

/// Quantize a value against the block maximum. Zero is the tombstone code.
#[inline]
#[must_use]
pub fn quantize(value: f32, max_value: f32) -> u8 {
    if max_value <= 1e-9 {
        return 0;
    }
    let scaled = (value / max_value) * 255.0;
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Invert [`quantize`] up to the block's quantization error.
#[inline]
#[must_use]
pub fn dequantize(code: u8, max_value: f32) -> f32 {
    f32::from(code) * (1.0 / 255.0) * max_value
}

/// Decoded doc-diff lanes at their stored width.
#[derive(Debug, Clone)]
pub enum BlockDiffs {
    /// 16-bit diffs.
    U16(Vec<u16>),
    /// 32-bit diffs.
    U32(Vec<u32>),
    /// 64-bit diffs.
    #[cfg(feature = "id64")]
    U64(Vec<u64>),
}

impl BlockDiffs {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(d) => d.len(),
            Self::U32(d) => d.len(),
            #[cfg(feature = "id64")]
            Self::U64(d) => d.len(),
        }
    }

    /// Whether the block holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The diff at an index, widened.
    #[inline]
    #[must_use]
    pub fn get(&self, at: usize) -> DocId {
        match self {
            Self::U16(d) => DocId::from(d[at]),
            #[cfg(not(feature = "id64"))]
            Self::U32(d) => d[at],
            #[cfg(feature = "id64")]
            Self::U32(d) => DocId::from(d[at]),
            #[cfg(feature = "id64")]
            Self::U64(d) => d[at],
        }
    }

    /// First index at or after `start` whose diff is `>= target`, or the
    /// entry count when no such index exists. A target beyond the lane
    /// width skips to the end without scanning.
    #[must_use]
    pub fn find_first_ge(&self, start: usize, target: DocId) -> usize {
        match self {
            Self::U16(d) => {
                if target > MAX_U16_DIFF {
                    d.len()
                } else {
                    simd::find_first_ge_u16(d, start, target as u16)
                }
            }
            #[cfg(not(feature = "id64"))]
            Self::U32(d) => simd::find_first_ge_u32(d, start, target),
            #[cfg(feature = "id64")]
            Self::U32(d) => {
                if target > u64::from(u32::MAX) {
                    d.len()
                } else {
                    simd::find_first_ge_u32(d, start, target as u32)
                }
            }
            #[cfg(feature = "id64")]
            Self::U64(d) => {
                let mut at = start;
                while at < d.len() && d[at] < target {
                    at += 1;
                }
                at
            }
        }
    }
}

/// A decoded block ready for traversal: diff lanes, raw value bytes, and
/// the header fields the search needs.
#[derive(Debug, Clone)]
pub struct BlockView {
    /// Doc-diff lanes at their stored width.
    pub diffs: BlockDiffs,
    /// Quantized values; `0` is a tombstone.
    pub values: Vec<u8>,
    /// The stored block maximum, used to dequantize.
    pub max_value: f32,
    /// Count of live entries at save time.
    pub live_count: u16,
}

/// Narrowest diff width (in bits) that holds the largest diff of a block.
fn diff_bits_for(max_diff: DocId) -> u8 {
    if max_diff <= MAX_U16_DIFF {
        return 16;
    }
    #[cfg(feature = "id64")]
    if max_diff > DocId::from(u32::MAX) {
        return 64;
    }
    32
}

/// Encode entries into a block record. Returns the bytes and the block
/// maximum that was stored in the header.
#[must_use]
pub fn encode_block(entries: &[BlockEntry]) -> (Vec<u8>, f32) {
    debug_assert!(entries.len() <= usize::from(u16::MAX));
    debug_assert!(entries.windows(2).all(|w| w[0].doc_diff < w[1].doc_diff));

    let mut max_value = 0.0f32;
    let mut max_diff: DocId = 0;
    let mut live_count: u16 = 0;
    for entry in entries {
        if entry.value > max_value {
            max_value = entry.value;
        }
        if entry.doc_diff > max_diff {
            max_diff = entry.doc_diff;
        }
        if entry.value > 0.0 {
            live_count += 1;
        }
    }

    let diff_bits = diff_bits_for(max_diff);
    let diff_width = usize::from(diff_bits / 8);

    let n = entries.len();
    let mut bytes = Vec::with_capacity(HEADER_LEN + n * diff_width + n);
    bytes.push(BLOCK_VERSION);
    bytes.push(diff_bits);
    bytes.extend_from_slice(&(n as u16).to_le_bytes());
    bytes.extend_from_slice(&live_count.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes()); // padding
    bytes.extend_from_slice(&max_value.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // alignment pad

    match diff_bits {
        16 => {
            for entry in entries {
                bytes.extend_from_slice(&(entry.doc_diff as u16).to_le_bytes());
            }
        }
        32 => {
            for entry in entries {
                bytes.extend_from_slice(&(entry.doc_diff as u32).to_le_bytes());
            }
        }
        _ => {
            #[cfg(feature = "id64")]
            for entry in entries {
                bytes.extend_from_slice(&entry.doc_diff.to_le_bytes());
            }
        }
    }

    for entry in entries {
        bytes.push(quantize(entry.value, max_value));
    }

    (bytes, max_value)
}

/// Decode a block record into a traversal view.
///
/// # Errors
///
/// Returns [`SparseError::Corrupt`] on version/width mismatches or when the
/// record length disagrees with its declared entry count.
pub fn decode_block_view(bytes: &[u8]) -> SparseResult<BlockView> {
    if bytes.len() < HEADER_LEN {
        return Err(SparseError::Corrupt("block shorter than its header".to_string()));
    }
    let version = bytes[0];
    if version != BLOCK_VERSION {
        return Err(SparseError::Corrupt(format!("unsupported block version {version}")));
    }
    let diff_bits = bytes[1];
    let n = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
    let live_count = u16::from_le_bytes([bytes[4], bytes[5]]);
    let max_value = f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

    let diff_width = match diff_bits {
        16 => 2,
        32 => 4,
        #[cfg(feature = "id64")]
        64 => 8,
        other => {
            return Err(SparseError::Corrupt(format!("unsupported block diff width {other}")));
        }
    };
    if bytes.len() != HEADER_LEN + n * diff_width + n {
        return Err(SparseError::Corrupt(format!(
            "block length mismatch: {n} entries at {diff_bits}-bit diffs need {}, got {}",
            HEADER_LEN + n * diff_width + n,
            bytes.len()
        )));
    }

    let diff_bytes = &bytes[HEADER_LEN..HEADER_LEN + n * diff_width];
    let value_bytes = &bytes[HEADER_LEN + n * diff_width..];

    let diffs = match diff_bits {
        16 => BlockDiffs::U16(
            diff_bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect(),
        ),
        32 => BlockDiffs::U32(
            diff_bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        #[cfg(feature = "id64")]
        64 => BlockDiffs::U64(
            diff_bytes
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().expect("chunk length is fixed")))
                .collect(),
        ),
        _ => unreachable!("width validated above"),
    };

    Ok(BlockView { diffs, values: value_bytes.to_vec(), max_value, live_count })
}

/// Decode a block record into entries with dequantized values, for the
/// write path's read-modify-write cycle.
pub fn decode_block_entries(bytes: &[u8]) -> SparseResult<Vec<BlockEntry>> {
    let view = decode_block_view(bytes)?;
    let mut entries = Vec::with_capacity(view.diffs.len());
    for at in 0..view.diffs.len() {
        entries.push(BlockEntry::new(
            view.diffs.get(at),
            dequantize(view.values[at], view.max_value),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_zero_max_is_tombstone() {
        assert_eq!(quantize(1.0, 0.0), 0);
    }

    #[test]
    fn quantize_full_scale() {
        assert_eq!(quantize(1.0, 1.0), 255);
        assert_eq!(quantize(0.5, 1.0), 128);
        assert_eq!(quantize(0.0, 1.0), 0);
    }

    #[test]
    fn dequantize_error_is_bounded() {
        let max = 3.7f32;
        for value in [0.01f32, 0.5, 1.9, 3.69, 3.7] {
            let code = quantize(value, max);
            let back = dequantize(code, max);
            assert!((value - back).abs() <= max / 255.0, "{value} -> {code} -> {back}");
        }
    }

    #[test]
    fn block_idx_list_roundtrip() {
        let blocks = vec![BlockIdx::new(1, 0.5), BlockIdx::new(1000, 2.5)];
        let bytes = BlockIdx::encode_list(&blocks);
        assert_eq!(bytes.len(), 2 * BlockIdx::LEN);
        assert_eq!(BlockIdx::decode_list(&bytes).unwrap(), blocks);
    }

    #[test]
    fn block_idx_list_rejects_ragged_length() {
        assert!(matches!(BlockIdx::decode_list(&[0u8; 5]), Err(SparseError::Corrupt(_))));
    }

    #[test]
    fn encode_block_picks_16_bit_diffs() {
        let entries = vec![BlockEntry::new(0, 1.0), BlockEntry::new(65_535, 0.5)];
        let (bytes, max) = encode_block(&entries);
        assert_eq!(bytes[1], 16);
        assert_eq!(max, 1.0);
        assert_eq!(bytes.len(), HEADER_LEN + 2 * 2 + 2);
    }

    #[test]
    fn encode_block_widens_to_32_bit_diffs() {
        let entries = vec![BlockEntry::new(0, 1.0), BlockEntry::new(65_536, 0.5)];
        let (bytes, _) = encode_block(&entries);
        assert_eq!(bytes[1], 32);
        assert_eq!(bytes.len(), HEADER_LEN + 2 * 4 + 2);
    }

    #[test]
    fn block_view_roundtrip() {
        let entries = vec![
            BlockEntry::new(0, 0.25),
            BlockEntry::new(7, 1.0),
            BlockEntry::new(90_000, 0.5),
        ];
        let (bytes, max) = encode_block(&entries);
        let view = decode_block_view(&bytes).unwrap();

        assert_eq!(view.diffs.len(), 3);
        assert_eq!(view.diffs.get(2), 90_000);
        assert_eq!(view.max_value, max);
        assert_eq!(view.live_count, 3);

        let decoded = decode_block_entries(&bytes).unwrap();
        for (original, restored) in entries.iter().zip(&decoded) {
            assert_eq!(original.doc_diff, restored.doc_diff);
            assert!((original.value - restored.value).abs() <= max / 255.0);
        }
    }

    #[test]
    fn tombstones_keep_layout_and_live_count() {
        let entries =
            vec![BlockEntry::new(0, 0.5), BlockEntry::new(3, 0.0), BlockEntry::new(9, 1.0)];
        let (bytes, _) = encode_block(&entries);
        let view = decode_block_view(&bytes).unwrap();

        assert_eq!(view.diffs.len(), 3);
        assert_eq!(view.live_count, 2);
        assert_eq!(view.values[1], 0);
    }

    #[test]
    fn decode_rejects_truncated_block() {
        let (mut bytes, _) = encode_block(&[BlockEntry::new(0, 1.0)]);
        bytes.pop();
        assert!(matches!(decode_block_view(&bytes), Err(SparseError::Corrupt(_))));
    }

    #[test]
    fn decode_rejects_bad_version() {
        let (mut bytes, _) = encode_block(&[BlockEntry::new(0, 1.0)]);
        bytes[0] = 9;
        assert!(matches!(decode_block_view(&bytes), Err(SparseError::Corrupt(_))));
    }

    #[test]
    fn find_first_ge_skips_past_width() {
        let entries = vec![BlockEntry::new(0, 1.0), BlockEntry::new(10, 1.0)];
        let (bytes, _) = encode_block(&entries);
        let view = decode_block_view(&bytes).unwrap();
        assert_eq!(view.diffs.find_first_ge(0, 5), 1);
        assert_eq!(view.diffs.find_first_ge(0, 11), 2);
        assert_eq!(view.diffs.find_first_ge(0, MAX_U16_DIFF + 1), 2);
    }
}
