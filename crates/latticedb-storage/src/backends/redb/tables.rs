//! Physical table layout and logical-key multiplexing.
//!
//! All logical sub-stores share one physical redb table. A physical key is
//! `<table name><0x00><logical key>`; table names must not contain the
//! separator byte, which plain ASCII identifiers never do.

use redb::TableDefinition;

/// The single physical table holding every logical sub-store.
pub const DATA_TABLE: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("lattice_data");

/// Separator between the table name and the logical key.
pub const KEY_SEPARATOR: u8 = 0x00;

/// Encode a logical `(table, key)` pair into a physical key.
#[must_use]
pub fn encode_key(table: &str, key: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(table.len() + 1 + key.len());
    encoded.extend_from_slice(table.as_bytes());
    encoded.push(KEY_SEPARATOR);
    encoded.extend_from_slice(key);
    encoded
}

/// Split a physical key back into its logical table name and key.
///
/// Returns `None` for keys missing the separator.
#[must_use]
pub fn decode_key(encoded: &[u8]) -> Option<(&str, &[u8])> {
    let sep = encoded.iter().position(|&b| b == KEY_SEPARATOR)?;
    let table = std::str::from_utf8(&encoded[..sep]).ok()?;
    Some((table, &encoded[sep + 1..]))
}

/// First physical key belonging to a logical table.
#[must_use]
pub fn table_start_key(table: &str) -> Vec<u8> {
    encode_key(table, &[])
}

/// First physical key past the end of a logical table.
#[must_use]
pub fn table_end_key(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 1);
    key.extend_from_slice(table.as_bytes());
    key.push(KEY_SEPARATOR + 1);
    key
}
