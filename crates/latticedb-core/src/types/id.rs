//! Internal document identifiers.
//!
//! `DocId` is a plain integer alias rather than a newtype because ids
//! participate directly in byte-level record layouts (block diffs, bucket
//! entries, WAL records) where arithmetic on the raw integer is the point.
//!
//! The width is fixed at build time: 32 bits by default, 64 bits with the
//! `id64` cargo feature. Every on-disk `uN` field follows this width.

/// Internal numeric document id (64-bit build).
#[cfg(feature = "id64")]
pub type DocId = u64;

/// Internal numeric document id.
#[cfg(not(feature = "id64"))]
pub type DocId = u32;

/// Width of a serialized [`DocId`] in bytes.
pub const DOC_ID_BYTES: usize = std::mem::size_of::<DocId>();

/// Decode a little-endian [`DocId`] from the front of `bytes`.
///
/// Returns `None` if fewer than [`DOC_ID_BYTES`] bytes are available.
#[inline]
#[must_use]
pub fn doc_id_from_le(bytes: &[u8]) -> Option<DocId> {
    let arr: [u8; DOC_ID_BYTES] = bytes.get(..DOC_ID_BYTES)?.try_into().ok()?;
    Some(DocId::from_le_bytes(arr))
}
