//! Multi-node search: concurrent dispatch, broken-node skipping,
//! node-weight reranking, stable ordering, pagination, hydration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use lode_core::config::RootConfig;
use lode_core::constants::{PARSE_TIMEOUT, SEARCH_TIMEOUT};
use lode_core::models::{
    NodeHit, SearchMetadata, SearchRequest, SearchResponse, SearchResult, ValidationReport,
};
use lode_core::{CancellationToken, LodeError, LodeResult};
use lode_embeddings::{CacheMode, EmbeddingsCache};

use crate::node::{Node, OpenMode};

/// One configured node: either healthy or carrying the reason it
/// failed to open.
struct NodeEntry {
    id: String,
    state: Result<Arc<Node>, String>,
}

/// Aggregates search across every configured node.
pub struct MultiNodeSearch {
    entries: Vec<NodeEntry>,
    search_timeout: Duration,
    parse_timeout: Duration,
}

impl MultiNodeSearch {
    /// Open every configured node. Nodes that fail to open are kept as
    /// broken entries: searches skip them, and write commands that
    /// target them surface the stored reason.
    pub fn from_config(config: &RootConfig, mode: OpenMode) -> Self {
        let cache = open_cache(config, mode);

        let entries = config
            .nodes
            .iter()
            .map(|node_config| {
                let state = match Node::open(node_config, Arc::clone(&cache), mode) {
                    Ok(node) => Ok(Arc::new(node)),
                    Err(e) => {
                        warn!(node = %node_config.id, error = %e, "node unavailable");
                        Err(e.to_string())
                    }
                };
                NodeEntry {
                    id: node_config.id.clone(),
                    state,
                }
            })
            .collect();
        Self {
            entries,
            search_timeout: config
                .search_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(SEARCH_TIMEOUT),
            parse_timeout: config
                .parse_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(PARSE_TIMEOUT),
        }
    }

    /// A service over pre-built nodes (for testing).
    pub fn from_nodes(nodes: Vec<Arc<Node>>) -> Self {
        Self {
            entries: nodes
                .into_iter()
                .map(|node| NodeEntry {
                    id: node.id().to_string(),
                    state: Ok(node),
                })
                .collect(),
            search_timeout: SEARCH_TIMEOUT,
            parse_timeout: PARSE_TIMEOUT,
        }
    }

    /// Look up a healthy node by id.
    pub fn node(&self, id: &str) -> LodeResult<Arc<Node>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| LodeError::NodeNotFound { id: id.to_string() })?;
        match &entry.state {
            Ok(node) => Ok(Arc::clone(node)),
            Err(reason) => Err(LodeError::IndexUnavailable {
                id: id.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// The default node is the first one declared.
    pub fn default_node(&self) -> LodeResult<Arc<Node>> {
        let entry = self
            .entries
            .first()
            .ok_or_else(|| LodeError::invalid_config("no nodes configured"))?;
        self.node(&entry.id.clone())
    }

    /// (node_id, open-failure reason) pairs, in configuration order.
    pub fn status(&self) -> Vec<(String, Option<String>)> {
        self.entries
            .iter()
            .map(|e| (e.id.clone(), e.state.as_ref().err().cloned()))
            .collect()
    }

    /// Run a query across the resolved target nodes.
    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> LodeResult<SearchResponse> {
        let started = Instant::now();

        // An empty query is a normal request for nothing.
        if request.query.trim().is_empty() {
            return Ok(empty_response(started));
        }
        // Parse once; syntax and complexity errors surface before any
        // dispatch, and every node sees the same lowering.
        let ast = lode_query::parse_query_with_timeout(&request.query, self.parse_timeout)?;
        let extracted = Arc::new(lode_query::extract(&ast));

        let mut skipped: Vec<String> = Vec::new();
        let targets = self.resolve_targets(request, &mut skipped);

        let search_timeout = self.search_timeout;
        let mut tasks: JoinSet<(String, LodeResult<Vec<NodeHit>>)> = JoinSet::new();
        for node in targets {
            let extracted = Arc::clone(&extracted);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = match tokio::time::timeout(
                    search_timeout,
                    node.search_extracted(&extracted, &cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LodeError::NodeTimeout {
                        id: node.id().to_string(),
                    }),
                };
                // Node weight is applied at aggregation.
                let weight = f64::from(node.weight());
                (
                    node.id().to_string(),
                    result.map(|hits| {
                        hits.into_iter()
                            .map(|mut hit| {
                                hit.score *= weight;
                                hit
                            })
                            .collect()
                    }),
                )
            });
        }

        let mut hits: Vec<NodeHit> = Vec::new();
        let mut nodes_searched = 0;
        let mut hard_failures: Vec<(String, LodeError)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (node_id, result) = joined.map_err(|e| LodeError::Sqlite {
                message: format!("search task panicked: {e}"),
            })?;
            match result {
                Ok(node_hits) => {
                    nodes_searched += 1;
                    hits.extend(node_hits);
                }
                Err(e) if e.is_skippable_in_search() => {
                    debug!(node = %node_id, error = %e, "node skipped");
                    skipped.push(node_id);
                }
                Err(LodeError::NodeAccessDenied { .. }) => {
                    debug!(node = %node_id, "node not readable, skipped");
                    skipped.push(node_id);
                }
                Err(e) => hard_failures.push((node_id, e)),
            }
        }

        // Hard errors surface only when no node answered.
        if nodes_searched == 0 {
            if let Some((node_id, error)) = hard_failures.into_iter().next() {
                warn!(node = %node_id, error = %error, "search failed on every node");
                return Err(error);
            }
        } else {
            for (node_id, error) in hard_failures {
                warn!(node = %node_id, error = %error, "node failed, dropped from results");
                skipped.push(node_id);
            }
        }

        // Relevance floor applies after normalization and weighting.
        hits.retain(|hit| hit.score >= request.min_relevance);

        // Stable order: relevance desc, then node, then content id.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
                .then_with(|| a.content_id.cmp(&b.content_id))
        });

        let total_results = hits.len();
        let results = hits
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .map(hydrate)
            .collect();

        Ok(SearchResponse {
            results,
            total_results,
            metadata: SearchMetadata {
                nodes_searched,
                nodes_skipped: skipped,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Check a query without executing it.
    pub fn validate(&self, query: &str) -> ValidationReport {
        let error_message = if query.trim().is_empty() {
            None
        } else {
            lode_query::parse_query_with_timeout(query, self.parse_timeout)
                .err()
                .map(|e| e.to_string())
        };
        ValidationReport {
            is_valid: error_message.is_none(),
            error_message,
            available_fields: lode_query::available_fields(),
        }
    }

    /// Start from all nodes, intersect with `nodes` (or the `*`
    /// wildcard), remove `exclude_nodes`. Unknown requested ids and
    /// broken nodes are skipped, not errors.
    fn resolve_targets(
        &self,
        request: &SearchRequest,
        skipped: &mut Vec<String>,
    ) -> Vec<Arc<Node>> {
        let wanted: Option<Vec<&str>> = match &request.nodes {
            None => None,
            Some(list) if list.iter().any(|n| n == "*") => None,
            Some(list) => Some(list.iter().map(String::as_str).collect()),
        };

        if let Some(list) = &wanted {
            for requested in list {
                if !self.entries.iter().any(|e| &e.id == requested) {
                    warn!(node = %requested, "requested node is not configured; skipped");
                    skipped.push((*requested).to_string());
                }
            }
        }

        self.entries
            .iter()
            .filter(|entry| {
                wanted
                    .as_ref()
                    .map(|list| list.contains(&entry.id.as_str()))
                    .unwrap_or(true)
            })
            .filter(|entry| !request.exclude_nodes.contains(&entry.id))
            .filter_map(|entry| match &entry.state {
                Ok(node) => Some(Arc::clone(node)),
                Err(reason) => {
                    debug!(node = %entry.id, %reason, "broken node skipped");
                    skipped.push(entry.id.clone());
                    None
                }
            })
            .collect()
    }
}

fn hydrate(hit: NodeHit) -> SearchResult {
    SearchResult {
        content_id: hit.content_id,
        node_id: hit.node_id,
        index_id: hit.index_id,
        relevance: hit.score,
        snippet: hit.snippet,
        title: hit.record.title,
        content: hit.record.content,
        tags: hit.record.tags,
        created_at: hit.record.created_at,
        updated_at: hit.record.updated_at,
    }
}

/// Open the process-wide embeddings cache declared in config. Write
/// mode creates the parent directory; open failures degrade to a
/// disabled cache.
pub fn open_cache(config: &RootConfig, mode: OpenMode) -> Arc<EmbeddingsCache> {
    Arc::new(match &config.embeddings_cache {
        Some(cache_config) => {
            if mode == OpenMode::Write {
                if let Some(parent) = cache_config.path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
            }
            EmbeddingsCache::open(
                &cache_config.path,
                CacheMode::from_flags(cache_config.allow_read, cache_config.allow_write),
            )
        }
        None => EmbeddingsCache::disabled(),
    })
}

fn empty_response(started: Instant) -> SearchResponse {
    SearchResponse {
        results: Vec::new(),
        total_results: 0,
        metadata: SearchMetadata {
            nodes_searched: 0,
            nodes_skipped: Vec::new(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
    }
}
