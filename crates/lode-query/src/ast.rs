//! The shared query AST produced by both parsers.

use lode_core::constants::{MAX_BOOLEAN_OPERATORS, MAX_FIELD_VALUE_LENGTH, MAX_QUERY_DEPTH};
use lode_core::{LodeError, LodeResult};

/// The default field: a bare term matches here. Both parsers collapse
/// an explicit `content` qualifier to the bare form so semantically
/// equivalent inputs produce identical trees.
pub const DEFAULT_FIELD: &str = "content";

/// Field names backed directly by FTS columns.
pub const FTS_FIELDS: [&str; 3] = ["title", "description", "content"];

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    /// A bare term (or whitespace-joined phrase) in the default field.
    Text(String),
    /// A quoted string, matched contiguously; reserved words inside are
    /// literals.
    PhraseExact(String),
    /// Mongo `$text.$search` escape hatch; equivalent to `Text` at
    /// extraction.
    TextSearch(String),
    /// Restrict the child to a named field.
    Field(String, Box<QueryNode>),
    /// n-ary conjunction, at least two children.
    And(Vec<QueryNode>),
    /// n-ary disjunction, at least two children.
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
}

impl QueryNode {
    /// Nesting depth: a leaf is 1.
    pub fn depth(&self) -> usize {
        match self {
            Self::Text(_) | Self::PhraseExact(_) | Self::TextSearch(_) => 1,
            Self::Field(_, child) | Self::Not(child) => 1 + child.depth(),
            Self::And(children) | Self::Or(children) => {
                1 + children.iter().map(Self::depth).max().unwrap_or(0)
            }
        }
    }

    /// Boolean operator count: an n-ary node contributes n−1, a `Not`
    /// contributes 1.
    pub fn operator_count(&self) -> usize {
        match self {
            Self::Text(_) | Self::PhraseExact(_) | Self::TextSearch(_) => 0,
            Self::Field(_, child) => child.operator_count(),
            Self::Not(child) => 1 + child.operator_count(),
            Self::And(children) | Self::Or(children) => {
                children.len().saturating_sub(1)
                    + children.iter().map(Self::operator_count).sum::<usize>()
            }
        }
    }

    fn longest_value(&self) -> usize {
        match self {
            Self::Text(s) | Self::PhraseExact(s) | Self::TextSearch(s) => s.chars().count(),
            Self::Field(name, child) => name.chars().count().max(child.longest_value()),
            Self::Not(child) => child.longest_value(),
            Self::And(children) | Self::Or(children) => {
                children.iter().map(Self::longest_value).max().unwrap_or(0)
            }
        }
    }

    /// Enforce the complexity limits shared by both parsers.
    pub fn validate_complexity(&self) -> LodeResult<()> {
        if self.depth() > MAX_QUERY_DEPTH {
            return Err(LodeError::QueryTooComplex {
                limit: format!("depth exceeds {MAX_QUERY_DEPTH}"),
            });
        }
        if self.operator_count() > MAX_BOOLEAN_OPERATORS {
            return Err(LodeError::QueryTooComplex {
                limit: format!("more than {MAX_BOOLEAN_OPERATORS} boolean operators"),
            });
        }
        if self.longest_value() > MAX_FIELD_VALUE_LENGTH {
            return Err(LodeError::QueryTooComplex {
                limit: format!("field value exceeds {MAX_FIELD_VALUE_LENGTH} characters"),
            });
        }
        Ok(())
    }
}
