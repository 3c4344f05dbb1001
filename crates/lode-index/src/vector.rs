//! Dense-vector index: normalized embeddings scored by dot product.
//!
//! Embeddings are stored unit-norm as little-endian f32 blobs, so the
//! dot product against a unit-norm query is the cosine similarity.
//! Search is a brute-force scan; when `use_sqlite_vec` is set the
//! index probes for the extension at first use and logs one warning if
//! it is absent — scoring always goes through the pure path so results
//! are identical either way.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use lode_core::models::{ContentRecord, IndexHit, SearchIndexDescriptor};
use lode_core::vector::{dot, from_blob, normalize, to_blob};
use lode_core::{CancellationToken, IEmbeddingProvider, ISearchIndex, LodeError, LodeResult};

use lode_embeddings::EmbeddingsCache;

use crate::to_index_err;

/// A persistent vector index with a fixed dimensionality.
pub struct VectorIndex {
    descriptor: SearchIndexDescriptor,
    conn: Mutex<Connection>,
    dimensions: usize,
    provider: Arc<dyn IEmbeddingProvider>,
    cache: Arc<EmbeddingsCache>,
    use_sqlite_vec: bool,
    probed: AtomicBool,
}

impl VectorIndex {
    /// Open (or create) the index file.
    pub fn open(
        descriptor: SearchIndexDescriptor,
        path: &Path,
        dimensions: usize,
        provider: Arc<dyn IEmbeddingProvider>,
        cache: Arc<EmbeddingsCache>,
        use_sqlite_vec: bool,
    ) -> LodeResult<Self> {
        if dimensions == 0 {
            return Err(LodeError::invalid_argument(
                "vector index dimensions must be positive",
            ));
        }
        let conn = Connection::open(path).map_err(|e| LodeError::IndexUnavailable {
            id: descriptor.id.clone(),
            reason: format!("open {}: {e}", path.display()),
        })?;
        debug!(index = %descriptor.id, path = %path.display(), dimensions, "vector index opened");
        Self::init(descriptor, conn, dimensions, provider, cache, use_sqlite_vec)
    }

    /// Open an in-memory index (for testing).
    pub fn open_in_memory(
        descriptor: SearchIndexDescriptor,
        dimensions: usize,
        provider: Arc<dyn IEmbeddingProvider>,
        cache: Arc<EmbeddingsCache>,
    ) -> LodeResult<Self> {
        if dimensions == 0 {
            return Err(LodeError::invalid_argument(
                "vector index dimensions must be positive",
            ));
        }
        let conn = Connection::open_in_memory().map_err(|e| LodeError::IndexUnavailable {
            id: descriptor.id.clone(),
            reason: e.to_string(),
        })?;
        Self::init(descriptor, conn, dimensions, provider, cache, false)
    }

    fn init(
        descriptor: SearchIndexDescriptor,
        conn: Connection,
        dimensions: usize,
        provider: Arc<dyn IEmbeddingProvider>,
        cache: Arc<EmbeddingsCache>,
        use_sqlite_vec: bool,
    ) -> LodeResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;

             CREATE TABLE IF NOT EXISTS entries (
                 content_id TEXT PRIMARY KEY,
                 embedding  BLOB NOT NULL,
                 provider   TEXT NOT NULL,
                 model      TEXT NOT NULL,
                 created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             );",
        )
        .map_err(|e| LodeError::IndexUnavailable {
            id: descriptor.id.clone(),
            reason: format!("schema: {e}"),
        })?;
        Ok(Self {
            descriptor,
            conn: Mutex::new(conn),
            dimensions,
            provider,
            cache,
            use_sqlite_vec,
            probed: AtomicBool::new(false),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> LodeResult<T>
    where
        F: FnOnce(&Connection) -> LodeResult<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| to_index_err(format!("vector lock poisoned: {e}")))?;
        f(&guard)
    }

    /// Probe for the sqlite-vec extension on first use. At most one
    /// warning per index instance; the pure scan stays authoritative
    /// either way.
    fn probe_extension(&self) {
        if !self.use_sqlite_vec || self.probed.swap(true, Ordering::Relaxed) {
            return;
        }
        let available = self
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE VIRTUAL TABLE temp.vec_probe USING vec0(embedding float[4]);
                     DROP TABLE temp.vec_probe;",
                )
                .map_err(|e| to_index_err(e.to_string()))
            })
            .is_ok();
        if !available {
            warn!(
                index = %self.descriptor.id,
                "sqlite-vec extension unavailable; continuing with pure scan"
            );
        }
    }

    /// Resolve the raw embedding for a text: cache first, then the
    /// generator. Cache failures never fail the caller.
    async fn embed_raw(&self, text: &str) -> LodeResult<Vec<f32>> {
        let provider_id = self.provider.provider_id();
        let model_id = self.provider.model_id();
        if let Some(cached) = self.cache.get(provider_id, model_id, text) {
            debug!(index = %self.descriptor.id, "embedding cache hit");
            return Ok(cached);
        }
        let raw = self.provider.embed(text).await?;
        self.cache.put(provider_id, model_id, text, &raw);
        Ok(raw)
    }

    fn check_dimensions(&self, raw: &[f32]) -> LodeResult<()> {
        if raw.len() != self.dimensions {
            return Err(LodeError::DimensionMismatch {
                expected: self.dimensions,
                actual: raw.len(),
            });
        }
        Ok(())
    }

    /// Every content id present in the index, ascending.
    pub fn all_ids(&self) -> LodeResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT content_id FROM entries ORDER BY content_id ASC")
                .map_err(|e| to_index_err(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| to_index_err(e.to_string()))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|e| to_index_err(e.to_string()))?);
            }
            Ok(ids)
        })
    }

    pub fn len(&self) -> LodeResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
                .map_err(|e| to_index_err(e.to_string()))?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> LodeResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ISearchIndex for VectorIndex {
    fn descriptor(&self) -> &SearchIndexDescriptor {
        &self.descriptor
    }

    async fn index(&self, record: &ContentRecord, cancel: &CancellationToken) -> LodeResult<()> {
        cancel.check()?;
        self.probe_extension();

        let raw = self.embed_raw(&record.content).await?;
        self.check_dimensions(&raw)?;
        let unit = normalize(&raw)?;
        cancel.check()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entries (content_id, embedding, provider, model)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id,
                    to_blob(&unit),
                    self.provider.provider_id(),
                    self.provider.model_id(),
                ],
            )
            .map_err(|e| to_index_err(e.to_string()))?;
            Ok(())
        })
    }

    async fn remove(&self, content_id: &str) -> LodeResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM entries WHERE content_id = ?1", params![content_id])
                .map_err(|e| to_index_err(e.to_string()))?;
            Ok(())
        })
    }

    async fn clear(&self) -> LodeResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM entries", [])
                .map_err(|e| to_index_err(e.to_string()))?;
            Ok(())
        })
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> LodeResult<Vec<IndexHit>> {
        cancel.check()?;
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.probe_extension();

        let raw = self.embed_raw(query).await?;
        self.check_dimensions(&raw)?;
        let unit = normalize(&raw)?;
        cancel.check()?;

        let mut scored = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT content_id, embedding FROM entries")
                .map_err(|e| to_index_err(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(|e| to_index_err(e.to_string()))?;

            let mut scored: Vec<(String, f64)> = Vec::new();
            for row in rows {
                let (content_id, blob) = row.map_err(|e| to_index_err(e.to_string()))?;
                let stored = from_blob(&blob)?;
                // Rows written under a different dimensionality are skipped.
                if stored.len() != unit.len() {
                    continue;
                }
                scored.push((content_id, dot(&unit, &stored)?));
            }
            Ok(scored)
        })?;

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(content_id, score)| IndexHit {
                content_id,
                score,
                snippet: None,
            })
            .collect())
    }
}

impl Drop for VectorIndex {
    fn drop(&mut self) {
        if let Ok(conn) = self.conn.lock() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lode_core::models::IndexKind;
    use lode_embeddings::providers::HashedProvider;

    const DIMS: usize = 64;

    fn record(id: &str, content: &str) -> ContentRecord {
        ContentRecord {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            content: content.into(),
            mime_type: String::new(),
            tags: Vec::new(),
            source_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn index() -> VectorIndex {
        VectorIndex::open_in_memory(
            SearchIndexDescriptor::new("vec", IndexKind::Vector),
            DIMS,
            Arc::new(HashedProvider::new("fnv-bucket-64", DIMS)),
            Arc::new(EmbeddingsCache::disabled()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stored_vectors_are_unit_norm() {
        let vec_index = index();
        let cancel = CancellationToken::new();
        vec_index
            .index(&record("a", "hello world"), &cancel)
            .await
            .unwrap();

        vec_index
            .with_conn(|conn| {
                let blob: Vec<u8> = conn
                    .query_row(
                        "SELECT embedding FROM entries WHERE content_id = 'a'",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(|e| to_index_err(e.to_string()))?;
                let stored = from_blob(&blob)?;
                assert_eq!(stored.len(), DIMS);
                let magnitude = stored
                    .iter()
                    .map(|x| (*x as f64) * (*x as f64))
                    .sum::<f64>()
                    .sqrt();
                assert!((magnitude - 1.0).abs() <= 1e-5);
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn search_ranks_exact_text_first() {
        let vec_index = index();
        let cancel = CancellationToken::new();
        vec_index
            .index(&record("a", "rust tokio async runtime"), &cancel)
            .await
            .unwrap();
        vec_index
            .index(&record("b", "gardening with tulips"), &cancel)
            .await
            .unwrap();

        let hits = vec_index
            .search("rust tokio async runtime", 10, &cancel)
            .await
            .unwrap();
        assert_eq!(hits[0].content_id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let cancel = CancellationToken::new();
        // Provider emits 32 dims against an index declared at 64.
        let vec_index = VectorIndex::open_in_memory(
            SearchIndexDescriptor::new("vec", IndexKind::Vector),
            DIMS,
            Arc::new(HashedProvider::new("fnv-bucket-32", 32)),
            Arc::new(EmbeddingsCache::disabled()),
        )
        .unwrap();

        let err = vec_index
            .index(&record("a", "text"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LodeError::DimensionMismatch {
                expected: DIMS,
                actual: 32
            }
        ));
    }

    #[tokio::test]
    async fn remove_and_clear_are_idempotent() {
        let vec_index = index();
        let cancel = CancellationToken::new();
        vec_index.index(&record("a", "text"), &cancel).await.unwrap();
        vec_index.remove("a").await.unwrap();
        vec_index.remove("a").await.unwrap();
        assert!(vec_index.is_empty().unwrap());
        vec_index.clear().await.unwrap();
    }

    #[tokio::test]
    async fn zero_dimensions_rejected_at_construction() {
        let result = VectorIndex::open_in_memory(
            SearchIndexDescriptor::new("vec", IndexKind::Vector),
            0,
            Arc::new(HashedProvider::new("m", 4)),
            Arc::new(EmbeddingsCache::disabled()),
        );
        assert!(matches!(result, Err(LodeError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn cache_feeds_repeat_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(EmbeddingsCache::open(
            &dir.path().join("cache.db"),
            lode_embeddings::CacheMode::ReadWrite,
        ));
        let vec_index = VectorIndex::open_in_memory(
            SearchIndexDescriptor::new("vec", IndexKind::Vector),
            DIMS,
            Arc::new(HashedProvider::new("fnv-bucket-64", DIMS)),
            Arc::clone(&cache),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        vec_index
            .index(&record("a", "cache me"), &cancel)
            .await
            .unwrap();
        // The raw (pre-normalization) vector is now cached.
        assert_eq!(cache.len(), 1);
        assert!(cache.get("hashed", "fnv-bucket-64", "cache me").is_some());

        // A second index call for the same text hits the cache.
        vec_index
            .index(&record("b", "cache me"), &cancel)
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let vec_index = index();
        let cancel = CancellationToken::new();
        vec_index.index(&record("a", "text"), &cancel).await.unwrap();
        assert!(vec_index.search("", 10, &cancel).await.unwrap().is_empty());
        assert!(vec_index.search("text", 0, &cancel).await.unwrap().is_empty());
    }
}
