//! Core data types for `LatticeDB`.

mod id;
mod scored;
mod sparse;

pub use id::{doc_id_from_le, DocId, DOC_ID_BYTES};
pub use scored::ScoredDoc;
pub use sparse::SparseVector;
