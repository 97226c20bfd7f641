//! Storage layer: pluggable key-value backend (C6) + binary snapshot codec
//! (C7). See spec.md §4.6 and §6.

mod backend;
pub mod codec;

pub use backend::{FileBackend, Result, StorageBackend, StorageError};
