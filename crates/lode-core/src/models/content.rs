//! Content records: the user-visible unit of knowledge.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{LodeError, LodeResult};

/// A `key:value` tag. Values are case-preserving but compare
/// case-insensitively.
#[derive(Debug, Clone, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    /// Parse a `key:value` pair. The value must be non-empty; the key
    /// must not contain a colon.
    pub fn parse(raw: &str) -> LodeResult<Self> {
        let Some((key, value)) = raw.split_once(':') else {
            return Err(LodeError::invalid_argument(format!(
                "tag '{raw}' is not of the form key:value"
            )));
        };
        if key.is_empty() || value.is_empty() {
            return Err(LodeError::invalid_argument(format!(
                "tag '{raw}' has an empty key or value"
            )));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Parse a comma-separated `k:v,k:v` list, dropping duplicates while
    /// preserving first-seen order.
    pub fn parse_list(raw: &str) -> LodeResult<Vec<Self>> {
        let mut tags: Vec<Tag> = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let tag = Tag::parse(part)?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Ok(tags)
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.key.eq_ignore_ascii_case(&other.key) && self.value.eq_ignore_ascii_case(&other.value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Tag::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A stored content record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Whether any tag matches the given key (case-insensitive).
    pub fn has_tag_key(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key.eq_ignore_ascii_case(key))
    }
}

/// A page entry returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSummary {
    pub id: String,
    pub title: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to `upsert`.
#[derive(Debug, Clone, Default)]
pub struct UpsertRequest {
    /// Existing id to update in place; a fresh id is assigned when absent.
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub content: String,
    pub mime_type: String,
    pub tags: Vec<Tag>,
    pub source_url: Option<String>,
}

/// Result of an upsert or delete as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub id: String,
    /// Every planned step finished synchronously.
    pub completed: bool,
    /// At least one step is still pending or failed; the operation is
    /// retryable.
    pub queued: bool,
    /// Empty on full success; the first step error otherwise.
    pub error: String,
}
