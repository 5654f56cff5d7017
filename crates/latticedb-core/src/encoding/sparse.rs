//! Packed sparse-vector records.
//!
//! The persisted form of a sparse vector is a fixed layout of
//! `2 + 6 * nnz` bytes:
//!
//! ```text
//! [nnz: u16 le][term_ids: u32 le * nnz][values: f16 le * nnz]
//! ```
//!
//! Values are compressed to IEEE-754 half precision via the `half` crate.
//! Term ids stay exact; values round-trip within half-precision tolerance.

use half::f16;

use crate::error::CoreError;
use crate::types::SparseVector;

/// Size in bytes of a packed record holding `nnz` terms.
#[inline]
#[must_use]
pub const fn packed_len(nnz: usize) -> usize {
    2 + nnz * 6
}

/// Pack a sparse vector into its on-disk record.
#[must_use]
pub fn pack(vector: &SparseVector) -> Vec<u8> {
    pack_pairs(vector.as_pairs())
}

/// Pack sorted `(term_id, value)` pairs into the on-disk record.
#[must_use]
pub fn pack_pairs(pairs: &[(u32, f32)]) -> Vec<u8> {
    let nnz = pairs.len() as u16;
    let mut bytes = Vec::with_capacity(packed_len(pairs.len()));
    bytes.extend_from_slice(&nnz.to_le_bytes());
    for &(term_id, _) in pairs {
        bytes.extend_from_slice(&term_id.to_le_bytes());
    }
    for &(_, value) in pairs {
        bytes.extend_from_slice(&f16::from_f32(value).to_le_bytes());
    }
    bytes
}

/// Unpack an on-disk record into a sparse vector.
///
/// # Errors
///
/// Returns [`CoreError::Encoding`] if the record length disagrees with its
/// declared count or the term ids are not strictly ascending.
pub fn unpack(bytes: &[u8]) -> Result<SparseVector, CoreError> {
    if bytes.len() < 2 {
        return Err(CoreError::Encoding("packed sparse vector shorter than nnz field".to_string()));
    }
    let nnz = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;

    let expected = packed_len(nnz);
    if bytes.len() != expected {
        return Err(CoreError::Encoding(format!(
            "packed sparse vector length mismatch: expected {expected}, got {}",
            bytes.len()
        )));
    }

    let ids = &bytes[2..2 + nnz * 4];
    let vals = &bytes[2 + nnz * 4..];

    let mut data = Vec::with_capacity(nnz);
    let mut prev: Option<u32> = None;
    for i in 0..nnz {
        let term_id = u32::from_le_bytes([ids[i * 4], ids[i * 4 + 1], ids[i * 4 + 2], ids[i * 4 + 3]]);
        if let Some(p) = prev {
            if term_id <= p {
                return Err(CoreError::Encoding(format!(
                    "packed sparse vector term ids not strictly ascending at position {i}"
                )));
            }
        }
        prev = Some(term_id);
        let value = f16::from_le_bytes([vals[i * 2], vals[i * 2 + 1]]).to_f32();
        data.push((term_id, value));
    }

    Ok(SparseVector::from_sorted_unchecked(data))
}

/// Dot product of sorted query pairs against a packed record, zero-copy.
///
/// Malformed records contribute `0.0`.
#[must_use]
pub fn dot_packed(query: &[(u32, f32)], packed: &[u8]) -> f32 {
    if packed.len() < 2 || query.is_empty() {
        return 0.0;
    }
    let nnz = u16::from_le_bytes([packed[0], packed[1]]) as usize;
    if packed.len() != packed_len(nnz) || nnz == 0 {
        return 0.0;
    }

    let ids = &packed[2..2 + nnz * 4];
    let vals = &packed[2 + nnz * 4..];

    let mut result = 0.0f32;
    let mut qi = 0;
    let mut pi = 0;
    while qi < query.len() && pi < nnz {
        let (q_term, q_val) = query[qi];
        let p_term =
            u32::from_le_bytes([ids[pi * 4], ids[pi * 4 + 1], ids[pi * 4 + 2], ids[pi * 4 + 3]]);
        match q_term.cmp(&p_term) {
            std::cmp::Ordering::Equal => {
                let p_val = f16::from_le_bytes([vals[pi * 2], vals[pi * 2 + 1]]).to_f32();
                result += q_val * p_val;
                qi += 1;
                pi += 1;
            }
            std::cmp::Ordering::Less => qi += 1,
            std::cmp::Ordering::Greater => pi += 1,
        }
    }
    result
}
