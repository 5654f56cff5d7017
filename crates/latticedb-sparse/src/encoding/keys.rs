//! Sub-store names and key layouts.
//!
//! # Key formats
//!
//! | Sub-store | Key | Value |
//! |---|---|---|
//! | `term_blocks_index` | `term_id:u32 le` | packed `BlockIdx` array |
//! | `term_blocks` | `term_id:u32 le \|\| start_doc:uN le` | block header + SoA payload |
//! | `docs` | `doc_id:uN le` | packed sparse vector |
//! | `payloads` | `doc_id:uN le` | filter payload JSON |
//! | `filter_bitmaps` | `field ':' value` | serialized roaring bitmap |
//! | `numeric_forward` | `field ':' ascii(doc_id)` | `sortable:u32 le` |
//! | `numeric_inverted` | `field ':' start_value:u32 be` | bucket blob |
//! | `id_map` | external bytes | `doc_id:uN le` |
//! | `id_map_rev` | `doc_id:uN le` | external bytes |
//! | `id_meta` | reserved keys | counter / id array, `uN le` |
//!
//! Every fixed-width integer is little-endian except numeric bucket start
//! values, which are big-endian so the store's lexicographic key order
//! agrees with numeric order within a field.

use latticedb_core::{DocId, DOC_ID_BYTES};

/// Sub-store names.
pub mod tables {
    /// Per-term block lists (`BlockIdx` arrays).
    pub const TERM_BLOCKS_INDEX: &str = "term_blocks_index";
    /// Block payloads.
    pub const TERM_BLOCKS: &str = "term_blocks";
    /// Packed sparse vectors by doc id.
    pub const DOCS: &str = "docs";
    /// Filter payload JSON by doc id, kept for update/delete cleanup.
    pub const PAYLOADS: &str = "payloads";
    /// String/bool filter bitmaps, plus the reserved schema key.
    pub const FILTER_BITMAPS: &str = "filter_bitmaps";
    /// Numeric per-id forward entries.
    pub const NUMERIC_FORWARD: &str = "numeric_forward";
    /// Numeric buckets.
    pub const NUMERIC_INVERTED: &str = "numeric_inverted";
    /// External key to internal id.
    pub const ID_MAP: &str = "id_map";
    /// Internal id back to external key.
    pub const ID_MAP_REV: &str = "id_map_rev";
    /// Allocator state: next-id counter and deleted-id list.
    pub const ID_META: &str = "id_meta";
}

/// Reserved key for the persisted field-type schema, stored alongside the
/// filter bitmaps. Contains no `':'`, so it can never collide with a
/// `field:value` bitmap key.
pub const SCHEMA_KEY: &[u8] = b"__lattice_schema_v1__";

/// Reserved key holding the next-id counter.
pub const NEXT_ID_KEY: &[u8] = b"__next_id__";

/// Reserved key holding the packed deleted-id array.
pub const DELETED_IDS_KEY: &[u8] = b"__deleted_ids__";

/// Key into `term_blocks_index` for one term.
#[inline]
#[must_use]
pub fn term_index_key(term_id: u32) -> [u8; 4] {
    term_id.to_le_bytes()
}

/// Decode a `term_blocks_index` key back to its term id.
#[inline]
#[must_use]
pub fn decode_term_index_key(key: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = key.try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}

/// Key into `term_blocks` for one block: packed `term_id || start_doc_id`.
#[must_use]
pub fn term_block_key(term_id: u32, start_doc_id: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + DOC_ID_BYTES);
    key.extend_from_slice(&term_id.to_le_bytes());
    key.extend_from_slice(&start_doc_id.to_le_bytes());
    key
}

/// Key into `docs` / `payloads` / `id_map_rev` for one document.
#[inline]
#[must_use]
pub fn doc_key(doc_id: DocId) -> [u8; DOC_ID_BYTES] {
    doc_id.to_le_bytes()
}

/// Key into `filter_bitmaps`: `field ':' value`.
#[must_use]
pub fn filter_key(field: &str, value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 1 + value.len());
    key.extend_from_slice(field.as_bytes());
    key.push(b':');
    key.extend_from_slice(value.as_bytes());
    key
}

/// Key into `numeric_forward`: `field ':' ascii(doc_id)`.
#[must_use]
pub fn numeric_forward_key(field: &str, doc_id: DocId) -> Vec<u8> {
    let id = doc_id.to_string();
    let mut key = Vec::with_capacity(field.len() + 1 + id.len());
    key.extend_from_slice(field.as_bytes());
    key.push(b':');
    key.extend_from_slice(id.as_bytes());
    key
}

/// Prefix shared by every `numeric_inverted` key of a field: `field ':'`.
#[must_use]
pub fn bucket_prefix(field: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 1);
    key.extend_from_slice(field.as_bytes());
    key.push(b':');
    key
}

/// Key into `numeric_inverted`: `field ':' start_value:u32 be`.
#[must_use]
pub fn bucket_key(field: &str, start_value: u32) -> Vec<u8> {
    let mut key = bucket_prefix(field);
    key.extend_from_slice(&start_value.to_be_bytes());
    key
}

/// Decode the start value from a `numeric_inverted` key with the given
/// field prefix. Returns `None` for keys of other fields or bad lengths.
#[must_use]
pub fn decode_bucket_key(key: &[u8], prefix: &[u8]) -> Option<u32> {
    if !key.starts_with(prefix) || key.len() != prefix.len() + 4 {
        return None;
    }
    let arr: [u8; 4] = key[prefix.len()..].try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_index_key_roundtrip() {
        let key = term_index_key(0xDEAD_BEEF);
        assert_eq!(decode_term_index_key(&key), Some(0xDEAD_BEEF));
        assert_eq!(decode_term_index_key(&key[..3]), None);
    }

    #[test]
    fn term_block_key_is_packed() {
        let key = term_block_key(7, 42);
        assert_eq!(key.len(), 4 + DOC_ID_BYTES);
        assert_eq!(&key[..4], 7u32.to_le_bytes().as_slice());
        assert_eq!(&key[4..], (42 as DocId).to_le_bytes().as_slice());
    }

    #[test]
    fn bucket_keys_sort_numerically() {
        let a = bucket_key("price", 1);
        let b = bucket_key("price", 255);
        let c = bucket_key("price", 256);
        let d = bucket_key("price", u32::MAX);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn bucket_key_roundtrip() {
        let prefix = bucket_prefix("price");
        let key = bucket_key("price", 1234);
        assert_eq!(decode_bucket_key(&key, &prefix), Some(1234));

        // Other fields and malformed lengths decode to None.
        assert_eq!(decode_bucket_key(&bucket_key("cost", 1), &prefix), None);
        assert_eq!(decode_bucket_key(&prefix, &prefix), None);
    }

    #[test]
    fn filter_key_format() {
        assert_eq!(filter_key("category", "Billing"), b"category:Billing".to_vec());
    }

    #[test]
    fn numeric_forward_key_format() {
        assert_eq!(numeric_forward_key("price", 17), b"price:17".to_vec());
    }

    #[test]
    fn schema_key_cannot_collide_with_bitmap_keys() {
        assert!(!SCHEMA_KEY.contains(&b':'));
    }
}
