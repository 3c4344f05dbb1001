//! Contracts at the seams: search indexes and embedding providers.

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::errors::LodeResult;
use crate::models::{ContentRecord, IndexHit, SearchIndexDescriptor};

/// A search index registered on a node.
///
/// Implementations own their backing file exclusively and must survive
/// close-and-reopen after any successful write returns.
#[async_trait]
pub trait ISearchIndex: Send + Sync {
    fn descriptor(&self) -> &SearchIndexDescriptor;

    /// Upsert-semantic: an existing entry for the same `record.id` is
    /// replaced atomically. Each index picks the fields it consumes.
    async fn index(&self, record: &ContentRecord, cancel: &CancellationToken) -> LodeResult<()>;

    /// Idempotent; no error if the id is absent.
    async fn remove(&self, content_id: &str) -> LodeResult<()>;

    /// Drop all entries, preserving the schema.
    async fn clear(&self) -> LodeResult<()>;

    /// `query` is index-native: FTS5 match syntax for FTS indexes, raw
    /// query text for vector indexes. An empty query returns no hits.
    /// Results are ordered by descending score, ties broken by
    /// ascending `content_id`.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> LodeResult<Vec<IndexHit>>;
}

/// Embedding generation capability consumed by vector indexes.
#[async_trait]
pub trait IEmbeddingProvider: Send + Sync {
    /// Embed a single text, returning a raw (not necessarily
    /// normalized) vector of floats.
    async fn embed(&self, text: &str) -> LodeResult<Vec<f32>>;

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Stable provider identifier, used in cache keys.
    fn provider_id(&self) -> &str;

    /// Model identifier, used in cache keys and provenance columns.
    fn model_id(&self) -> &str;
}
