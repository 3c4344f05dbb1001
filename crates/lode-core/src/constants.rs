//! Engine-wide defaults and limits.

use std::time::Duration;

/// Maximum length of an extracted snippet, in characters.
pub const DEFAULT_SNIPPET_LENGTH: usize = 200;

/// Ellipsis inserted where a snippet is cut.
pub const SNIPPET_SEPARATOR: &str = "…";

/// Markers wrapped around matched terms in snippets.
pub const SNIPPET_MARK_OPEN: &str = "<mark>";
pub const SNIPPET_MARK_CLOSE: &str = "</mark>";

/// Results below this relevance are dropped unless the request overrides it.
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.3;

/// Default page size for search requests.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Per-node candidate cap before reranking.
pub const MAX_RESULTS_PER_NODE: usize = 1000;

/// Maximum nesting depth of a parsed query AST.
pub const MAX_QUERY_DEPTH: usize = 10;

/// Maximum number of boolean operators in one query.
pub const MAX_BOOLEAN_OPERATORS: usize = 50;

/// Maximum length of a single term, phrase, or field value in a query.
pub const MAX_FIELD_VALUE_LENGTH: usize = 1000;

/// Budget for parsing one query string.
pub const PARSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Budget for one multi-node search.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Weight applied to an index or node when the config does not set one.
pub const DEFAULT_WEIGHT: f32 = 1.0;
