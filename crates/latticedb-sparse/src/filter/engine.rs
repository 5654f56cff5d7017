//! Filter evaluation and the field-type schema.
//!
//! Filters arrive as an ordered JSON array of single-field conditions,
//! `[{field: {op: value}}, ...]` with `op` one of `$eq`, `$in`, `$range`.
//! The result bitmap is the AND over conditions, with OR across the values
//! of an `$in`.
//!
//! A field's type is fixed the first time it is written: numbers go to the
//! numeric index, strings and booleans to the bitmap index. Later writes
//! with a conflicting type are skipped field-locally and reported; the rest
//! of the batch proceeds.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use roaring::RoaringBitmap;
use serde_json::Value as JsonValue;
use tracing::warn;

use latticedb_core::encoding::sortable::{float_to_sortable, int_to_sortable};
use latticedb_core::DocId;
use latticedb_storage::{StorageEngine, Transaction};

use crate::encoding::keys::{tables, SCHEMA_KEY};
use crate::error::{SparseError, SparseResult};
use crate::filter::{BitmapIndex, NumericIndex};

/// The type a filter field is locked to on first observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// String values, served by the bitmap index.
    String = 1,
    /// Integer or float values, served by the numeric index.
    Number = 2,
    /// Boolean values, stringified into the bitmap index.
    Bool = 4,
}

impl FieldType {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::String),
            2 => Some(Self::Number),
            4 => Some(Self::Bool),
            _ => None,
        }
    }

    /// The type a JSON payload value registers, `None` if unsupported.
    fn of_value(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Bool(_) => Some(Self::Bool),
            JsonValue::Number(_) => Some(Self::Number),
            JsonValue::String(_) => Some(Self::String),
            _ => None,
        }
    }
}

/// A field whose write was skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedField {
    /// The field name.
    pub field: String,
    /// Human-readable reason the write was skipped.
    pub reason: String,
}

/// Filter engine: schema plus bitmap and numeric indexes.
pub struct FilterEngine<E> {
    engine: Arc<E>,
    bitmaps: BitmapIndex<E>,
    numeric: NumericIndex<E>,
    schema: RwLock<HashMap<String, FieldType>>,
}

impl<E: StorageEngine> FilterEngine<E> {
    /// Open the filter engine, loading the persisted schema.
    pub fn open(engine: Arc<E>) -> SparseResult<Self> {
        let schema = Self::load_schema(&engine)?;
        Ok(Self {
            bitmaps: BitmapIndex::new(Arc::clone(&engine)),
            numeric: NumericIndex::new(Arc::clone(&engine)),
            engine,
            schema: RwLock::new(schema),
        })
    }

    /// The bitmap index, for direct string/bool lookups.
    #[must_use]
    pub fn bitmaps(&self) -> &BitmapIndex<E> {
        &self.bitmaps
    }

    /// The numeric index, for direct range lookups.
    #[must_use]
    pub fn numeric(&self) -> &NumericIndex<E> {
        &self.numeric
    }

    /// The registered type of a field, if any.
    pub fn field_type(&self, field: &str) -> SparseResult<Option<FieldType>> {
        Ok(self.schema.read().map_err(|_| SparseError::LockPoisoned)?.get(field).copied())
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Index a document's filter payload: a JSON object of `field: value`
    /// entries with string, number or boolean values.
    ///
    /// Fields that cannot be indexed (empty name, unsupported value type,
    /// type conflict with the registered schema) are skipped and reported;
    /// the remaining fields are still written.
    pub fn apply_payload_tx<T: Transaction>(
        &self,
        tx: &mut T,
        id: DocId,
        payload: &JsonValue,
    ) -> SparseResult<Vec<RejectedField>> {
        let Some(object) = payload.as_object() else {
            return Err(SparseError::InvalidFilter(
                "filter payload must be an object of field: value entries".to_string(),
            ));
        };

        let mut rejected = Vec::new();
        for (field, value) in object {
            if field.is_empty() {
                rejected.push(RejectedField {
                    field: field.clone(),
                    reason: "field name cannot be empty".to_string(),
                });
                continue;
            }
            let Some(ty) = FieldType::of_value(value) else {
                rejected.push(RejectedField {
                    field: field.clone(),
                    reason: "unsupported value type".to_string(),
                });
                continue;
            };
            if !self.register_field_type_tx(tx, field, ty)? {
                warn!(field = %field, ?ty, "filter write skipped: field registered with another type");
                rejected.push(RejectedField {
                    field: field.clone(),
                    reason: "type conflicts with the field's registered type".to_string(),
                });
                continue;
            }

            match value {
                JsonValue::Number(_) => {
                    let sortable = sortable_of(value).ok_or_else(|| {
                        SparseError::Internal("numeric payload value without encoding".to_string())
                    })?;
                    NumericIndex::<E>::put_tx(tx, field, id, sortable)?;
                }
                JsonValue::String(s) => BitmapIndex::<E>::add_tx(tx, field, s, id)?,
                JsonValue::Bool(b) => {
                    BitmapIndex::<E>::add_tx(tx, field, bool_str(*b), id)?;
                }
                _ => unreachable!("of_value admits only scalars"),
            }
        }
        Ok(rejected)
    }

    /// Drop a document's filter payload from the indexes.
    pub fn remove_payload_tx<T: Transaction>(
        &self,
        tx: &mut T,
        id: DocId,
        payload: &JsonValue,
    ) -> SparseResult<()> {
        let Some(object) = payload.as_object() else {
            return Ok(());
        };
        for (field, value) in object {
            match value {
                JsonValue::Number(_) => NumericIndex::<E>::remove_tx(tx, field, id)?,
                JsonValue::String(s) => BitmapIndex::<E>::remove_tx(tx, field, s, id)?,
                JsonValue::Bool(b) => BitmapIndex::<E>::remove_tx(tx, field, bool_str(*b), id)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Register a field's type on first observation. Returns whether the
    /// write may proceed (the type matches the registered one).
    fn register_field_type_tx<T: Transaction>(
        &self,
        tx: &mut T,
        field: &str,
        ty: FieldType,
    ) -> SparseResult<bool> {
        let mut schema = self.schema.write().map_err(|_| SparseError::LockPoisoned)?;
        if let Some(existing) = schema.get(field) {
            return Ok(*existing == ty);
        }
        schema.insert(field.to_string(), ty);

        let map: BTreeMap<&str, u8> =
            schema.iter().map(|(name, t)| (name.as_str(), t.code())).collect();
        let bytes = serde_json::to_vec(&map)
            .map_err(|e| SparseError::Internal(format!("schema serialization: {e}")))?;
        tx.put(tables::FILTER_BITMAPS, SCHEMA_KEY, &bytes)?;
        Ok(true)
    }

    fn load_schema(engine: &E) -> SparseResult<HashMap<String, FieldType>> {
        let tx = engine.begin_read()?;
        let Some(bytes) = tx.get(tables::FILTER_BITMAPS, SCHEMA_KEY)? else {
            return Ok(HashMap::new());
        };
        let raw: HashMap<String, u8> = serde_json::from_slice(&bytes)
            .map_err(|e| SparseError::Corrupt(format!("filter schema: {e}")))?;
        let mut schema = HashMap::with_capacity(raw.len());
        for (field, code) in raw {
            let ty = FieldType::from_code(code).ok_or_else(|| {
                SparseError::Corrupt(format!("filter schema: unknown type code {code}"))
            })?;
            schema.insert(field, ty);
        }
        Ok(schema)
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Evaluate a condition list into a candidate bitmap on one snapshot.
    pub fn compute_bitmap_tx<T: Transaction>(
        &self,
        tx: &T,
        conditions: &JsonValue,
    ) -> SparseResult<RoaringBitmap> {
        let Some(conditions) = conditions.as_array() else {
            return Err(SparseError::InvalidFilter("filter must be an array".to_string()));
        };
        if conditions.is_empty() {
            return Ok(RoaringBitmap::new());
        }

        let mut result: Option<RoaringBitmap> = None;
        for condition in conditions {
            let (field, expr) = single_entry(condition, "condition")?;
            if field.is_empty() {
                return Err(SparseError::InvalidFilter(
                    "filter field name cannot be empty".to_string(),
                ));
            }
            let (op, value) = single_entry(expr, "operator")?;
            let ty = self.field_type(field)?;

            let matched = match op {
                "$eq" => self.eval_eq(tx, ty, field, value)?,
                "$in" => {
                    let Some(values) = value.as_array() else {
                        return Err(SparseError::InvalidFilter("$in expects an array".to_string()));
                    };
                    let mut union = RoaringBitmap::new();
                    for v in values {
                        union |= self.eval_eq(tx, ty, field, v)?;
                    }
                    union
                }
                "$range" => {
                    if ty != Some(FieldType::Number) {
                        return Err(SparseError::InvalidFilter(
                            "$range is only supported for numeric fields".to_string(),
                        ));
                    }
                    let bounds = value.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                        SparseError::InvalidFilter(
                            "$range expects a [start, end] array".to_string(),
                        )
                    })?;
                    let lo = sortable_of(&bounds[0]).ok_or_else(|| {
                        SparseError::InvalidFilter("range start must be a number".to_string())
                    })?;
                    let hi = sortable_of(&bounds[1]).ok_or_else(|| {
                        SparseError::InvalidFilter("range end must be a number".to_string())
                    })?;
                    if lo > hi {
                        return Err(SparseError::RangeOverflow);
                    }
                    NumericIndex::<E>::range_tx(tx, field, lo, hi)?
                }
                other => {
                    return Err(SparseError::InvalidFilter(format!(
                        "unsupported operator: {other}"
                    )));
                }
            };

            result = Some(match result {
                None => matched,
                Some(acc) => acc & matched,
            });
        }

        Ok(result.unwrap_or_default())
    }

    /// Evaluate a condition list on a fresh snapshot.
    pub fn compute_bitmap(&self, conditions: &JsonValue) -> SparseResult<RoaringBitmap> {
        let tx = self.engine.begin_read()?;
        self.compute_bitmap_tx(&tx, conditions)
    }

    /// Ids matching a condition list, ascending.
    pub fn matching_ids(&self, conditions: &JsonValue) -> SparseResult<Vec<DocId>> {
        Ok(self.compute_bitmap(conditions)?.iter().map(|id| id as DocId).collect())
    }

    /// Number of ids matching a condition list.
    pub fn matching_count(&self, conditions: &JsonValue) -> SparseResult<u64> {
        Ok(self.compute_bitmap(conditions)?.len())
    }

    fn eval_eq<T: Transaction>(
        &self,
        tx: &T,
        ty: Option<FieldType>,
        field: &str,
        value: &JsonValue,
    ) -> SparseResult<RoaringBitmap> {
        if ty == Some(FieldType::Number) {
            let sortable = sortable_of(value).ok_or_else(|| {
                SparseError::InvalidFilter("value for a numeric field must be a number".to_string())
            })?;
            return NumericIndex::<E>::range_tx(tx, field, sortable, sortable);
        }

        // String/bool fields, and fields never written: bitmap lookup.
        // Integers coerce to their decimal form; floats have no string form.
        let text = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Bool(b) => bool_str(*b).to_string(),
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
            _ => {
                return Err(SparseError::InvalidFilter(
                    "value must be a string, integer or boolean".to_string(),
                ));
            }
        };
        BitmapIndex::<E>::bitmap_of_tx(tx, field, &text)
    }
}

/// Boolean stringification used on both write and read paths.
fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Order-preserving key of a JSON number, `None` for non-numbers.
fn sortable_of(value: &JsonValue) -> Option<u32> {
    if let Some(i) = value.as_i64() {
        let clamped = i.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        return Some(int_to_sortable(clamped));
    }
    value.as_f64().map(|f| float_to_sortable(f as f32))
}

/// Destructure `{key: value}` objects with exactly one entry.
fn single_entry<'v>(value: &'v JsonValue, what: &str) -> SparseResult<(&'v str, &'v JsonValue)> {
    let object = value
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| SparseError::InvalidFilter(format!("each {what} must be a single-field object")))?;
    let (key, inner) = object.iter().next().expect("length checked above");
    Ok((key.as_str(), inner))
}
