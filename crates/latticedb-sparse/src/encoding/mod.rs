//! Key encodings for every sub-store this crate owns.

pub mod keys;
