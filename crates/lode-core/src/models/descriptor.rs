//! Runtime descriptors for the search indexes registered on a node.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_WEIGHT;

/// The kind of backing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Fts,
    Vector,
}

/// Describes one search index registered on a node. Built from config
/// at startup; not persisted in the content database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexDescriptor {
    /// Unique per node.
    pub id: String,
    pub kind: IndexKind,
    /// Positive multiplier applied at reranking.
    pub weight: f32,
    /// When true, a failure on this index fails the owning operation.
    pub required: bool,
}

impl SearchIndexDescriptor {
    pub fn new(id: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            id: id.into(),
            kind,
            weight: DEFAULT_WEIGHT,
            required: false,
        }
    }
}
