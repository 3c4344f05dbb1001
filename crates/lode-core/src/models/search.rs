//! Search request/response shapes shared by the node and multi-node
//! services and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MIN_RELEVANCE, DEFAULT_SEARCH_LIMIT};
use crate::models::content::{ContentRecord, Tag};

/// A raw hit from one index, before hydration and weighting.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub content_id: String,
    /// Normalized to `[0, 1]` for FTS; cosine similarity for vector.
    pub score: f64,
    pub snippet: Option<String>,
}

/// A weighted, hydrated hit from one node.
#[derive(Debug, Clone)]
pub struct NodeHit {
    pub content_id: String,
    pub node_id: String,
    pub index_id: String,
    pub score: f64,
    pub snippet: Option<String>,
    pub record: ContentRecord,
}

/// A multi-node search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    /// Target node ids; `None` or `["*"]` means all nodes.
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_nodes: Vec<String>,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_min_relevance() -> f64 {
    DEFAULT_MIN_RELEVANCE
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
            min_relevance: DEFAULT_MIN_RELEVANCE,
            nodes: None,
            exclude_nodes: Vec::new(),
        }
    }
}

/// One hydrated result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content_id: String,
    pub node_id: String,
    pub index_id: String,
    pub relevance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub title: String,
    pub content: String,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregator bookkeeping returned alongside results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Nodes that answered the query.
    pub nodes_searched: usize,
    /// Nodes skipped because they were broken or uninitialized.
    pub nodes_skipped: Vec<String>,
    pub elapsed_ms: u64,
}

/// The multi-node search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Count after the relevance filter, before pagination.
    pub total_results: usize,
    pub metadata: SearchMetadata,
}

/// Returned by `validate_query` without executing the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub available_fields: Vec<String>,
}
