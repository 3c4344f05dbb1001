//! The operation ledger: one `Operation` per ingestion verb, one
//! `OperationStep` row per planned step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step token for the content-storage upsert step.
pub const STEP_UPSERT: &str = "upsert";
/// Step token for the content-storage delete step.
pub const STEP_DELETE: &str = "delete";

/// Step token for indexing a record into the named search index.
pub fn index_step(index_id: &str) -> String {
    format!("index:{index_id}")
}

/// Step token for removing a record from the named search index.
pub fn index_delete_step(index_id: &str) -> String {
    format!("index:{index_id}:delete")
}

/// What a step token instructs the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Ensure the content row is persisted.
    Upsert,
    /// Ensure the content row is removed.
    Delete,
    /// Index the record into the named search index.
    Index { index_id: String },
    /// Remove the record from the named search index.
    IndexDelete { index_id: String },
}

impl StepAction {
    /// Decode a step token. Unknown tokens return `None` so the pipeline
    /// can fail the step with a recorded error instead of panicking.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            STEP_UPSERT => Some(Self::Upsert),
            STEP_DELETE => Some(Self::Delete),
            _ => {
                let rest = token.strip_prefix("index:")?;
                match rest.strip_suffix(":delete") {
                    Some(id) if !id.is_empty() => Some(Self::IndexDelete {
                        index_id: id.to_string(),
                    }),
                    None if !rest.is_empty() => Some(Self::Index {
                        index_id: rest.to_string(),
                    }),
                    _ => None,
                }
            }
        }
    }
}

/// The ingestion verb an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Upsert,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(Self::Upsert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Ledger entry for one ingestion verb against one content record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub content_id: String,
    pub kind: OperationKind,
    /// `planned_steps[0]` is the storage step; the rest are
    /// `index:<id>` (upserts) or `index:<id>:delete` (deletes), one per
    /// configured search index, in configuration order.
    pub planned_steps: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One row per `(operation_id, step)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStep {
    pub operation_id: String,
    pub step: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_tokens_roundtrip() {
        assert_eq!(StepAction::parse("upsert"), Some(StepAction::Upsert));
        assert_eq!(StepAction::parse("delete"), Some(StepAction::Delete));
        assert_eq!(
            StepAction::parse(&index_step("fts")),
            Some(StepAction::Index {
                index_id: "fts".into()
            })
        );
        assert_eq!(
            StepAction::parse(&index_delete_step("vec")),
            Some(StepAction::IndexDelete {
                index_id: "vec".into()
            })
        );
    }

    #[test]
    fn malformed_step_tokens_are_rejected() {
        assert_eq!(StepAction::parse("index:"), None);
        assert_eq!(StepAction::parse("index::delete"), None);
        assert_eq!(StepAction::parse("reindex:x"), None);
    }
}
