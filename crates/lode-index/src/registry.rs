//! The ordered set of search indexes registered on one node.
//!
//! Built once from config at startup, immutable thereafter. The
//! indexing pipeline looks indexes up here by the id embedded in each
//! step token.

use std::sync::Arc;

use lode_core::config::NodeConfig;
use lode_core::models::SearchIndexDescriptor;
use lode_core::{ISearchIndex, LodeError, LodeResult};

use lode_embeddings::{create_provider, EmbeddingsCache};

use crate::fts::FtsIndex;
use crate::vector::VectorIndex;

/// Ordered registry of index instances for one node.
pub struct IndexRegistry {
    entries: Vec<Arc<dyn ISearchIndex>>,
}

impl IndexRegistry {
    /// Build every index declared on the node, in declaration order.
    pub fn build(node: &NodeConfig, cache: Arc<EmbeddingsCache>) -> LodeResult<Self> {
        let mut entries: Vec<Arc<dyn ISearchIndex>> = Vec::with_capacity(node.search_indexes.len());
        for index_config in &node.search_indexes {
            let descriptor = index_config.descriptor();
            if index_config.is_vector() {
                // Config validation guarantees these are present.
                let dimensions = index_config.dimensions.ok_or_else(|| {
                    LodeError::invalid_config(format!(
                        "index '{}': missing dimensions",
                        index_config.id
                    ))
                })?;
                let embeddings = index_config.embeddings.as_ref().ok_or_else(|| {
                    LodeError::invalid_config(format!(
                        "index '{}': missing embeddings",
                        index_config.id
                    ))
                })?;
                let provider = create_provider(embeddings, dimensions)?;
                entries.push(Arc::new(VectorIndex::open(
                    descriptor,
                    &index_config.path,
                    dimensions,
                    provider,
                    Arc::clone(&cache),
                    index_config.use_sqlite_vec.unwrap_or(false),
                )?));
            } else {
                entries.push(Arc::new(FtsIndex::open(
                    descriptor,
                    &index_config.path,
                    index_config.stemming_enabled(),
                )?));
            }
        }
        Ok(Self { entries })
    }

    /// A registry over pre-built indexes (for testing).
    pub fn from_entries(entries: Vec<Arc<dyn ISearchIndex>>) -> Self {
        Self { entries }
    }

    /// Look up an index by id.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn ISearchIndex>> {
        self.entries.iter().find(|e| e.descriptor().id == id)
    }

    /// Like `get`, but absence is an `IndexNotFound` error.
    pub fn get_required(&self, id: &str) -> LodeResult<&Arc<dyn ISearchIndex>> {
        self.get(id).ok_or_else(|| LodeError::IndexNotFound {
            id: id.to_string(),
        })
    }

    /// Index ids in declaration order; this order drives step planning.
    pub fn ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.descriptor().id.clone())
            .collect()
    }

    pub fn descriptors(&self) -> Vec<SearchIndexDescriptor> {
        self.entries.iter().map(|e| e.descriptor().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ISearchIndex>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
