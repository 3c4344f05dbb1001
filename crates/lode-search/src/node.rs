//! One node: content store + index registry + the operations the CLI
//! verbs map onto.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use tracing::debug;

use lode_core::config::{NodeAccess, NodeConfig};
use lode_core::constants::MAX_RESULTS_PER_NODE;
use lode_core::models::{
    ContentRecord, ContentSummary, IndexKind, NodeHit, UpsertOutcome, UpsertRequest,
};
use lode_core::{CancellationToken, LodeError, LodeResult};
use lode_embeddings::EmbeddingsCache;
use lode_index::IndexRegistry;
use lode_query::{extract, parse_query, residual, ExtractedQuery};
use lode_storage::ContentStore;

use crate::pipeline::IndexingPipeline;

/// Pseudo index id attributed to hits produced by scanning the content
/// store (inverted or residual-only queries).
const CONTENT_SCAN_ID: &str = "content";

/// How a node is opened. Write mode creates parent directories; read
/// mode refuses to touch a node whose content database was never
/// written, so broken or fresh nodes degrade instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// A self-contained storage+index unit; the smallest routable search
/// target.
pub struct Node {
    id: String,
    access: NodeAccess,
    weight: f32,
    store: ContentStore,
    registry: IndexRegistry,
}

impl Node {
    /// Open a node from its configuration.
    pub fn open(
        config: &NodeConfig,
        cache: Arc<EmbeddingsCache>,
        mode: OpenMode,
    ) -> LodeResult<Self> {
        match mode {
            OpenMode::Write => {
                let mut dirs: Vec<_> = vec![config.content_index.path.clone()];
                dirs.extend(config.search_indexes.iter().map(|i| i.path.clone()));
                for path in dirs {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).map_err(|e| LodeError::Sqlite {
                            message: format!("cannot create {}: {e}", parent.display()),
                        })?;
                    }
                }
            }
            OpenMode::Read => {
                if !config.content_index.path.exists() {
                    return Err(LodeError::IndexUnavailable {
                        id: config.id.clone(),
                        reason: format!(
                            "content database {} not initialized",
                            config.content_index.path.display()
                        ),
                    });
                }
            }
        }

        let store = ContentStore::open(&config.content_index.path)?;
        let registry = IndexRegistry::build(config, cache)?;
        debug!(node = %config.id, indexes = registry.len(), ?mode, "node opened");
        Ok(Self {
            id: config.id.clone(),
            access: config.access,
            weight: config.weight,
            store,
            registry,
        })
    }

    /// A node over pre-built parts (for testing).
    pub fn assemble(
        id: impl Into<String>,
        access: NodeAccess,
        weight: f32,
        store: ContentStore,
        registry: IndexRegistry,
    ) -> Self {
        Self {
            id: id.into(),
            access,
            weight,
            store,
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn access(&self) -> NodeAccess {
        self.access
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    fn require_write(&self) -> LodeResult<()> {
        if !self.access.allows_write() {
            return Err(LodeError::NodeAccessDenied {
                id: self.id.clone(),
                reason: format!("access mode is '{}'", self.access),
            });
        }
        Ok(())
    }

    fn require_read(&self) -> LodeResult<()> {
        if !self.access.allows_read() {
            return Err(LodeError::NodeAccessDenied {
                id: self.id.clone(),
                reason: format!("access mode is '{}'", self.access),
            });
        }
        Ok(())
    }

    /// Upsert: persist + plan in one transaction, then drive every
    /// step synchronously. A required-index failure is surfaced; other
    /// index failures leave the operation queued for retry.
    pub async fn upsert(
        &self,
        request: UpsertRequest,
        cancel: &CancellationToken,
    ) -> LodeResult<UpsertOutcome> {
        self.require_write()?;
        let (record, operation) = self.store.plan_upsert(request, &self.registry.ids())?;
        let pipeline = IndexingPipeline::new(&self.store, &self.registry);
        let outcome = pipeline.drive(&operation, cancel).await?;
        if let Some(err) = outcome.required_failure {
            return Err(err);
        }
        Ok(UpsertOutcome {
            id: record.id,
            completed: outcome.completed,
            queued: !outcome.completed,
            error: outcome.first_error.unwrap_or_default(),
        })
    }

    /// Delete: idempotent; succeeds even when the id was never stored.
    pub async fn delete(
        &self,
        content_id: &str,
        cancel: &CancellationToken,
    ) -> LodeResult<UpsertOutcome> {
        self.require_write()?;
        let operation = self.store.plan_delete(content_id, &self.registry.ids())?;
        let pipeline = IndexingPipeline::new(&self.store, &self.registry);
        let outcome = pipeline.drive(&operation, cancel).await?;
        if let Some(err) = outcome.required_failure {
            return Err(err);
        }
        Ok(UpsertOutcome {
            id: content_id.to_string(),
            completed: outcome.completed,
            queued: !outcome.completed,
            error: outcome.first_error.unwrap_or_default(),
        })
    }

    pub fn get(&self, id: &str) -> LodeResult<ContentRecord> {
        self.store.get_required(id)
    }

    pub fn list(&self, skip: usize, take: usize) -> LodeResult<Vec<ContentSummary>> {
        self.store.list(skip, take)
    }

    /// Re-drive operations with outstanding steps.
    pub async fn drive_incomplete(&self, cancel: &CancellationToken) -> LodeResult<usize> {
        let pipeline = IndexingPipeline::new(&self.store, &self.registry);
        pipeline.drive_incomplete(cancel).await
    }

    /// Run a query on this node: parse, lower to FTS + residuals,
    /// gather per-index candidates, hydrate, post-filter, weight.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> LodeResult<Vec<NodeHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let ast = parse_query(query)?;
        self.search_extracted(&extract(&ast), cancel).await
    }

    /// Run an already-lowered query. The aggregator parses once and
    /// fans the same extraction out to every node.
    pub async fn search_extracted(
        &self,
        extracted: &ExtractedQuery,
        cancel: &CancellationToken,
    ) -> LodeResult<Vec<NodeHit>> {
        self.require_read()?;
        debug!(
            node = %self.id,
            fts = extracted.match_expr.as_deref().unwrap_or(""),
            invert = extracted.invert,
            scan_all = extracted.scan_all,
            residuals = extracted.residuals.len(),
            "query lowered"
        );

        let mut hits = Vec::new();

        if extracted.scan_all {
            // No FTS expression can narrow candidates: every record is
            // checked against the residuals.
            for content_id in self.store.all_ids()? {
                cancel.check()?;
                self.push_if_matching(&mut hits, content_id, 1.0, None, CONTENT_SCAN_ID, extracted)?;
            }
            return Ok(hits);
        }

        let Some(match_expr) = &extracted.match_expr else {
            return Ok(Vec::new());
        };

        for index in self.registry.iter() {
            let descriptor = index.descriptor();
            match descriptor.kind {
                IndexKind::Fts if extracted.invert => {
                    // All documents minus those matching the child.
                    let matched: HashSet<String> = index
                        .search(match_expr, MAX_RESULTS_PER_NODE, cancel)
                        .await?
                        .into_iter()
                        .map(|h| h.content_id)
                        .collect();
                    for content_id in self.store.all_ids()? {
                        if matched.contains(&content_id) {
                            continue;
                        }
                        self.push_if_matching(
                            &mut hits,
                            content_id,
                            f64::from(descriptor.weight),
                            None,
                            &descriptor.id,
                            extracted,
                        )?;
                    }
                }
                IndexKind::Fts => {
                    for hit in index
                        .search(match_expr, MAX_RESULTS_PER_NODE, cancel)
                        .await?
                    {
                        self.push_if_matching(
                            &mut hits,
                            hit.content_id,
                            hit.score * f64::from(descriptor.weight),
                            hit.snippet,
                            &descriptor.id,
                            extracted,
                        )?;
                    }
                }
                IndexKind::Vector => {
                    // Vector indexes answer the positive literals; a
                    // purely negative query gives them nothing to embed.
                    if extracted.invert || extracted.semantic_text.is_empty() {
                        continue;
                    }
                    for hit in index
                        .search(&extracted.semantic_text, MAX_RESULTS_PER_NODE, cancel)
                        .await?
                    {
                        // Cosine can be negative; relevance is [0, 1].
                        let score = hit.score.max(0.0) * f64::from(descriptor.weight);
                        self.push_if_matching(
                            &mut hits,
                            hit.content_id,
                            score,
                            None,
                            &descriptor.id,
                            extracted,
                        )?;
                    }
                }
            }
        }

        Ok(hits)
    }

    /// Hydrate the candidate, apply residual predicates, and record
    /// the hit if it survives.
    fn push_if_matching(
        &self,
        hits: &mut Vec<NodeHit>,
        content_id: String,
        score: f64,
        snippet: Option<String>,
        index_id: &str,
        extracted: &ExtractedQuery,
    ) -> LodeResult<()> {
        // An index can briefly know ids the store no longer has.
        let Some(record) = self.store.get(&content_id)? else {
            return Ok(());
        };
        if !extracted
            .residuals
            .iter()
            .all(|predicate| residual::matches(predicate, &record))
        {
            return Ok(());
        }
        hits.push(NodeHit {
            content_id,
            node_id: self.id.clone(),
            index_id: index_id.to_string(),
            score,
            snippet,
            record,
        });
        Ok(())
    }
}
