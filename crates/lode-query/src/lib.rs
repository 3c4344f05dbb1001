//! # lode-query
//!
//! The query layer: a shared AST fed by two front-end grammars (infix
//! boolean and Mongo-style JSON), an extractor that lowers the AST to
//! FTS5 match syntax plus in-memory residual predicates, and the
//! residual evaluator itself.

pub mod ast;
pub mod extract;
pub mod infix;
pub mod json;
pub mod residual;

pub use ast::QueryNode;
pub use extract::{extract, ExtractedQuery};

use lode_core::LodeResult;

/// Parse a query string: JSON iff the first non-whitespace character
/// is `{`, infix otherwise.
pub fn parse_query(input: &str) -> LodeResult<QueryNode> {
    if input.trim_start().starts_with('{') {
        json::parse(input)
    } else {
        infix::parse(input)
    }
}

/// Like [`parse_query`] with a caller-supplied parse budget. JSON
/// parsing is bounded by serde's own recursion limit; the budget
/// applies to the infix grammar.
pub fn parse_query_with_timeout(
    input: &str,
    timeout: std::time::Duration,
) -> LodeResult<QueryNode> {
    if input.trim_start().starts_with('{') {
        json::parse(input)
    } else {
        infix::parse_with_timeout(input, timeout)
    }
}

/// Field names the engine understands natively. Tag keys beyond these
/// are permissive and resolve to residual predicates.
pub fn available_fields() -> Vec<String> {
    vec![
        "title".to_string(),
        "description".to_string(),
        "content".to_string(),
        "tags".to_string(),
    ]
}
