//! Root configuration: nodes, their search indexes, and the embeddings
//! cache.
//!
//! The file is JSON. Declaration order is semantic: the first node in
//! the `nodes` mapping is the default node, and search indexes fan out
//! in array order. `serde_json` is built with `preserve_order` so the
//! mapping survives the round trip. Unknown keys are errors.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::DEFAULT_WEIGHT;
use crate::errors::{LodeError, LodeResult};
use crate::models::{IndexKind, SearchIndexDescriptor};

const CONTENT_INDEX_TYPE: &str = "sqlite";
const FTS_INDEX_TYPE: &str = "sqliteFTS";
const VECTOR_INDEX_TYPE: &str = "sqliteVector";

/// Advisory access mode for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAccess {
    Read,
    Write,
    Full,
}

impl NodeAccess {
    pub fn allows_read(self) -> bool {
        matches!(self, Self::Read | Self::Full)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, Self::Write | Self::Full)
    }
}

impl fmt::Display for NodeAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Full => "full",
        };
        f.write_str(s)
    }
}

/// The per-node content database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ContentIndexConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
}

/// Provider settings for a vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// One search index declaration. `type` selects which of the optional
/// fields are required; `validate` enforces the split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SearchIndexConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub path: PathBuf,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default)]
    pub required: bool,
    /// FTS only. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_stemming: Option<bool>,
    /// Vector only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    /// Vector only. Defaults to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_sqlite_vec: Option<bool>,
    /// Vector only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<EmbeddingsConfig>,
}

impl SearchIndexConfig {
    pub fn is_fts(&self) -> bool {
        self.kind == FTS_INDEX_TYPE
    }

    pub fn is_vector(&self) -> bool {
        self.kind == VECTOR_INDEX_TYPE
    }

    /// Stemming applies to FTS indexes and is on unless disabled.
    pub fn stemming_enabled(&self) -> bool {
        self.enable_stemming.unwrap_or(true)
    }

    pub fn descriptor(&self) -> SearchIndexDescriptor {
        SearchIndexDescriptor {
            id: self.id.clone(),
            kind: if self.is_vector() {
                IndexKind::Vector
            } else {
                IndexKind::Fts
            },
            weight: self.weight,
            required: self.required,
        }
    }

    fn validate(&self, node_id: &str) -> LodeResult<()> {
        let at = format!("node '{node_id}' index '{}'", self.id);
        if self.id.is_empty() {
            return Err(LodeError::invalid_config(format!(
                "{at}: id must be non-empty"
            )));
        }
        if !(self.weight > 0.0) {
            return Err(LodeError::invalid_config(format!(
                "{at}: weight must be positive"
            )));
        }
        match self.kind.as_str() {
            FTS_INDEX_TYPE => {
                if self.dimensions.is_some()
                    || self.use_sqlite_vec.is_some()
                    || self.embeddings.is_some()
                {
                    return Err(LodeError::invalid_config(format!(
                        "{at}: dimensions/useSqliteVec/embeddings do not apply to {FTS_INDEX_TYPE}"
                    )));
                }
            }
            VECTOR_INDEX_TYPE => {
                if self.enable_stemming.is_some() {
                    return Err(LodeError::invalid_config(format!(
                        "{at}: enableStemming does not apply to {VECTOR_INDEX_TYPE}"
                    )));
                }
                match self.dimensions {
                    Some(d) if d > 0 => {}
                    Some(_) => {
                        return Err(LodeError::invalid_config(format!(
                            "{at}: dimensions must be positive"
                        )))
                    }
                    None => {
                        return Err(LodeError::invalid_config(format!(
                            "{at}: dimensions is required"
                        )))
                    }
                }
                if self.embeddings.is_none() {
                    return Err(LodeError::invalid_config(format!(
                        "{at}: embeddings is required"
                    )));
                }
            }
            other => {
                return Err(LodeError::invalid_config(format!(
                    "{at}: unknown index type '{other}'"
                )))
            }
        }
        Ok(())
    }
}

/// One node: a content database plus zero or more search indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct NodeConfig {
    pub id: String,
    pub access: NodeAccess,
    /// Multiplier applied to this node's results at aggregation.
    #[serde(default = "default_weight")]
    pub weight: f32,
    pub content_index: ContentIndexConfig,
    #[serde(default)]
    pub search_indexes: Vec<SearchIndexConfig>,
}

impl NodeConfig {
    fn validate(&self) -> LodeResult<()> {
        if self.content_index.kind != CONTENT_INDEX_TYPE {
            return Err(LodeError::invalid_config(format!(
                "node '{}': contentIndex type must be '{CONTENT_INDEX_TYPE}'",
                self.id
            )));
        }
        if !(self.weight > 0.0) {
            return Err(LodeError::invalid_config(format!(
                "node '{}': weight must be positive",
                self.id
            )));
        }
        for (i, index) in self.search_indexes.iter().enumerate() {
            index.validate(&self.id)?;
            if self.search_indexes[..i].iter().any(|other| other.id == index.id) {
                return Err(LodeError::invalid_config(format!(
                    "node '{}': duplicate index id '{}'",
                    self.id, index.id
                )));
            }
        }
        Ok(())
    }
}

/// The shared embeddings cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CacheConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub allow_read: bool,
    #[serde(default = "default_true")]
    pub allow_write: bool,
}

/// The root configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RootConfig {
    /// Nodes in declaration order; the first is the default.
    #[serde(
        deserialize_with = "nodes_from_ordered_map",
        serialize_with = "nodes_to_map"
    )]
    pub nodes: Vec<NodeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings_cache: Option<CacheConfig>,
    /// Override of the multi-node search budget (default 30s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_timeout_ms: Option<u64>,
    /// Override of the query-parse budget (default 1000ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_timeout_ms: Option<u64>,
}

impl RootConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> LodeResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            LodeError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate configuration JSON.
    pub fn parse(raw: &str) -> LodeResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| LodeError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> LodeResult<()> {
        if self.nodes.is_empty() {
            return Err(LodeError::invalid_config("at least one node is required"));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            node.validate()?;
            if self.nodes[..i].iter().any(|other| other.id == node.id) {
                return Err(LodeError::invalid_config(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        Ok(())
    }

    /// The default node is the first one declared.
    pub fn first_node(&self) -> &NodeConfig {
        &self.nodes[0]
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn to_json_pretty(&self) -> LodeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LodeError::invalid_config(e.to_string()))
    }

    /// Write the config file, creating parent directories.
    pub fn save(&self, path: &Path) -> LodeResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LodeError::invalid_config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        fs::write(path, self.to_json_pretty()?).map_err(|e| {
            LodeError::invalid_config(format!("cannot write {}: {e}", path.display()))
        })
    }

    /// A single-node starter config rooted under `base_dir`. Uses the
    /// offline `hashed` embedding provider so a fresh install works
    /// without a model server.
    pub fn starter(base_dir: &Path) -> Self {
        let node_dir = base_dir.join("main");
        Self {
            nodes: vec![NodeConfig {
                id: "main".into(),
                access: NodeAccess::Full,
                weight: DEFAULT_WEIGHT,
                content_index: ContentIndexConfig {
                    kind: CONTENT_INDEX_TYPE.into(),
                    path: node_dir.join("content.db"),
                },
                search_indexes: vec![
                    SearchIndexConfig {
                        kind: FTS_INDEX_TYPE.into(),
                        id: "fts".into(),
                        path: node_dir.join("fts.db"),
                        weight: DEFAULT_WEIGHT,
                        required: false,
                        enable_stemming: None,
                        dimensions: None,
                        use_sqlite_vec: None,
                        embeddings: None,
                    },
                    SearchIndexConfig {
                        kind: VECTOR_INDEX_TYPE.into(),
                        id: "vector".into(),
                        path: node_dir.join("vector.db"),
                        weight: DEFAULT_WEIGHT,
                        required: false,
                        enable_stemming: None,
                        dimensions: Some(256),
                        use_sqlite_vec: Some(false),
                        embeddings: Some(EmbeddingsConfig {
                            provider: "hashed".into(),
                            model: "fnv-bucket-256".into(),
                            base_url: None,
                            api_key: None,
                        }),
                    },
                ],
            }],
            embeddings_cache: Some(CacheConfig {
                path: base_dir.join("embeddings-cache.db"),
                allow_read: true,
                allow_write: true,
            }),
            search_timeout_ms: None,
            parse_timeout_ms: None,
        }
    }
}

fn default_weight() -> f32 {
    DEFAULT_WEIGHT
}

fn default_true() -> bool {
    true
}

/// Deserialize the `nodes` mapping preserving declaration order and
/// enforcing that each entry's `id` matches its key.
fn nodes_from_ordered_map<'de, D>(deserializer: D) -> Result<Vec<NodeConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = serde_json::Map::deserialize(deserializer)?;
    let mut nodes = Vec::with_capacity(map.len());
    for (key, value) in map {
        let node: NodeConfig = serde_json::from_value(value)
            .map_err(|e| D::Error::custom(format!("node '{key}': {e}")))?;
        if node.id != key {
            return Err(D::Error::custom(format!(
                "node key '{key}' does not match id '{}'",
                node.id
            )));
        }
        nodes.push(node);
    }
    Ok(nodes)
}

fn nodes_to_map<S>(nodes: &[NodeConfig], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(nodes.iter().map(|n| (n.id.clone(), n)))
}
