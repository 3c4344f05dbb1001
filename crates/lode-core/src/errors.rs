//! Error surface shared across the workspace.
//!
//! One flat enum: every kind a caller can observe, with enough context
//! to classify (caret positions, expected/actual dimensions). Storage
//! internals are folded into `Sqlite`.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type LodeResult<T> = Result<T, LodeError>;

/// All error kinds surfaced by the engine.
#[derive(Debug, Error)]
pub enum LodeError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("query syntax error at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    #[error("query too complex: {limit}")]
    QueryTooComplex { limit: String },

    #[error("index not found: {id}")]
    IndexNotFound { id: String },

    #[error("index unavailable: {id}: {reason}")]
    IndexUnavailable { id: String, reason: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    #[error("node access denied: {id}: {reason}")]
    NodeAccessDenied { id: String, reason: String },

    #[error("node timed out: {id}")]
    NodeTimeout { id: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("SQLite error: {message}")]
    Sqlite { message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl LodeError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether a per-node search failure of this kind is skipped by the
    /// aggregator instead of propagated: unknown indexes, unknown nodes,
    /// and databases that have never been written to.
    pub fn is_skippable_in_search(&self) -> bool {
        matches!(
            self,
            Self::IndexNotFound { .. }
                | Self::NodeNotFound { .. }
                | Self::IndexUnavailable { .. }
                | Self::Sqlite { .. }
        )
    }
}
