//! Structured attribute filtering.
//!
//! Two persistent indexes back the filter layer:
//!
//! - [`BitmapIndex`] maps `(field, value string)` to a compressed bitmap of
//!   doc ids, serving string and boolean equality.
//! - [`NumericIndex`] keeps bucketed posting lists over order-preserving
//!   numeric keys, serving equality and range predicates over integers and
//!   floats.
//!
//! [`FilterEngine`] sits on top: it owns the first-write-wins field schema,
//! routes writes to the right index, and evaluates `$eq` / `$in` / `$range`
//! condition lists into a single candidate bitmap.

mod bitmap_index;
mod engine;
mod numeric_index;

pub use bitmap_index::BitmapIndex;
pub use engine::{FieldType, FilterEngine, RejectedField};
pub use numeric_index::NumericIndex;
