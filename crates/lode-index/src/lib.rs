//! # lode-index
//!
//! The search indexes registered on a node: a stemmed, BM25-ranked
//! FTS5 index and a normalized dense-vector index, plus the ordered
//! registry the indexing pipeline dispatches through.

pub mod fts;
pub mod registry;
pub mod vector;

pub use fts::FtsIndex;
pub use registry::IndexRegistry;
pub use vector::VectorIndex;

use lode_core::LodeError;

/// Fold an index-layer SQLite failure into the shared error surface.
pub(crate) fn to_index_err(message: impl Into<String>) -> LodeError {
    LodeError::Sqlite {
        message: message.into(),
    }
}
