//! Lower the query AST to FTS5 match syntax plus residual predicates.
//!
//! The FTS expression narrows candidates; anything the engine cannot
//! express (tag fields, unknown field names, disjunctions containing
//! either) becomes a residual predicate evaluated per candidate after
//! retrieval. A root-level negation inverts the match set at the node
//! level instead of panicking.

use crate::ast::{QueryNode, FTS_FIELDS};

/// The lowered form of one query.
#[derive(Debug, Clone, Default)]
pub struct ExtractedQuery {
    /// FTS5 MATCH expression for the expressible part, if any.
    pub match_expr: Option<String>,
    /// Root-level negation: the result set is all ids minus the
    /// matches of `match_expr`.
    pub invert: bool,
    /// No FTS expression can soundly narrow candidates; every record
    /// must be checked against the residuals.
    pub scan_all: bool,
    /// Conjunctive predicates applied to each candidate in memory.
    pub residuals: Vec<QueryNode>,
    /// Positive literals joined with spaces, used for semantic
    /// (vector) search.
    pub semantic_text: String,
}

/// What one subtree lowers to.
enum Lowered {
    /// Fully expressible in FTS5.
    Fts(String),
    /// Expressible positives plus residual conjuncts (And only).
    Mixed {
        fts: String,
        residuals: Vec<QueryNode>,
    },
    /// Must be evaluated in memory as a whole.
    Residual(QueryNode),
}

/// Lower an AST to its FTS expression and residual predicates.
pub fn extract(node: &QueryNode) -> ExtractedQuery {
    let mut extracted = match node {
        // Standalone NOT: issue the query for the child and invert the
        // result set at the node level.
        QueryNode::Not(child) => match lower(child) {
            Lowered::Fts(fts) => ExtractedQuery {
                match_expr: Some(fts),
                invert: true,
                ..Default::default()
            },
            _ => ExtractedQuery {
                scan_all: true,
                residuals: vec![node.clone()],
                ..Default::default()
            },
        },
        _ => match lower(node) {
            Lowered::Fts(fts) => ExtractedQuery {
                match_expr: Some(fts),
                ..Default::default()
            },
            Lowered::Mixed { fts, residuals } => ExtractedQuery {
                match_expr: Some(fts),
                residuals,
                ..Default::default()
            },
            Lowered::Residual(residual) => ExtractedQuery {
                scan_all: true,
                residuals: vec![residual],
                ..Default::default()
            },
        },
    };

    let mut literals = Vec::new();
    collect_positive_literals(node, &mut literals);
    extracted.semantic_text = literals.join(" ");
    extracted
}

fn lower(node: &QueryNode) -> Lowered {
    match node {
        QueryNode::Text(t) | QueryNode::TextSearch(t) => Lowered::Fts(fts_term(t)),
        QueryNode::PhraseExact(t) => Lowered::Fts(fts_phrase(t)),
        QueryNode::Field(name, child) if FTS_FIELDS.contains(&name.as_str()) => {
            // Recurse through the equality operator rather than
            // special-casing it away.
            match lower(child) {
                Lowered::Fts(inner) => {
                    if matches!(**child, QueryNode::Text(_) | QueryNode::PhraseExact(_) | QueryNode::TextSearch(_)) {
                        Lowered::Fts(format!("{name} : {inner}"))
                    } else {
                        Lowered::Fts(format!("{name} : ({inner})"))
                    }
                }
                _ => Lowered::Residual(node.clone()),
            }
        }
        // Tag keys and unknown field names are residual predicates.
        QueryNode::Field(_, _) => Lowered::Residual(node.clone()),
        QueryNode::And(children) => lower_and(node, children),
        QueryNode::Or(children) => {
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                match lower(child) {
                    Lowered::Fts(fts) => parts.push(fts),
                    // A disjunction with an inexpressible branch cannot
                    // soundly narrow candidates; evaluate the whole OR
                    // in memory.
                    _ => return Lowered::Residual(node.clone()),
                }
            }
            Lowered::Fts(format!("({})", parts.join(" OR ")))
        }
        QueryNode::Not(_) => Lowered::Residual(node.clone()),
    }
}

fn lower_and(whole: &QueryNode, children: &[QueryNode]) -> Lowered {
    let mut positives: Vec<String> = Vec::new();
    let mut negatives: Vec<String> = Vec::new();
    let mut residuals: Vec<QueryNode> = Vec::new();

    for child in children {
        match child {
            QueryNode::Not(inner) => match lower(inner) {
                // And(x, Not(y)) lowers to `x NOT y`.
                Lowered::Fts(fts) => negatives.push(fts),
                _ => residuals.push(child.clone()),
            },
            _ => match lower(child) {
                Lowered::Fts(fts) => positives.push(fts),
                Lowered::Mixed {
                    fts,
                    residuals: inner,
                } => {
                    positives.push(fts);
                    residuals.extend(inner);
                }
                Lowered::Residual(residual) => residuals.push(residual),
            },
        }
    }

    if positives.is_empty() {
        // Nothing narrows the candidate set; the whole conjunction is
        // evaluated in memory.
        return Lowered::Residual(whole.clone());
    }

    let mut fts = positives.join(" AND ");
    for negative in negatives {
        // FTS5 NOT is left-associative and binds the accumulated
        // expression.
        fts = format!("{fts} NOT {negative}");
    }

    if residuals.is_empty() {
        Lowered::Fts(fts)
    } else {
        Lowered::Mixed { fts, residuals }
    }
}

/// A term needs quoting when FTS5 would read it as syntax: reserved
/// words, embedded whitespace, or any non-alphanumeric character.
fn fts_term(term: &str) -> String {
    let reserved = matches!(term.to_ascii_uppercase().as_str(), "AND" | "OR" | "NOT");
    let plain = !term.is_empty()
        && term.chars().all(|c| c.is_alphanumeric() || c == '_');
    if plain && !reserved {
        term.to_string()
    } else {
        fts_phrase(term)
    }
}

/// Quote a phrase, doubling internal double quotes. Reserved words
/// inside a quoted phrase are literals by construction.
fn fts_phrase(phrase: &str) -> String {
    format!("\"{}\"", phrase.replace('"', "\"\""))
}

fn collect_positive_literals(node: &QueryNode, out: &mut Vec<String>) {
    match node {
        QueryNode::Text(t) | QueryNode::PhraseExact(t) | QueryNode::TextSearch(t) => {
            if !t.trim().is_empty() {
                out.push(t.trim().to_string());
            }
        }
        QueryNode::Field(_, child) => collect_positive_literals(child, out),
        QueryNode::And(children) | QueryNode::Or(children) => {
            for child in children {
                collect_positive_literals(child, out);
            }
        }
        // Negated literals carry no positive signal.
        QueryNode::Not(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infix;
    use crate::json;

    fn extract_infix(query: &str) -> ExtractedQuery {
        extract(&infix::parse(query).unwrap())
    }

    #[test]
    fn bare_term_passes_through() {
        let q = extract_infix("kubernetes");
        assert_eq!(q.match_expr.as_deref(), Some("kubernetes"));
        assert!(!q.invert && !q.scan_all);
        assert!(q.residuals.is_empty());
        assert_eq!(q.semantic_text, "kubernetes");
    }

    #[test]
    fn whitespace_text_becomes_phrase() {
        let q = extract(&QueryNode::Text("two words".into()));
        assert_eq!(q.match_expr.as_deref(), Some("\"two words\""));
    }

    #[test]
    fn phrase_escapes_internal_quotes() {
        let q = extract(&QueryNode::PhraseExact("say \"hi\"".into()));
        assert_eq!(q.match_expr.as_deref(), Some("\"say \"\"hi\"\"\""));
    }

    #[test]
    fn reserved_words_are_quoted_literals() {
        let q = extract(&QueryNode::Text("AND".into()));
        assert_eq!(q.match_expr.as_deref(), Some("\"AND\""));
        let q = extract(&QueryNode::PhraseExact("cats AND dogs".into()));
        assert_eq!(q.match_expr.as_deref(), Some("\"cats AND dogs\""));
    }

    #[test]
    fn and_joins_with_operator() {
        let q = extract_infix("kubernetes AND docker");
        assert_eq!(q.match_expr.as_deref(), Some("kubernetes AND docker"));
        assert_eq!(q.semantic_text, "kubernetes docker");
    }

    #[test]
    fn or_is_parenthesized() {
        let q = extract_infix("a OR b OR c");
        assert_eq!(q.match_expr.as_deref(), Some("(a OR b OR c)"));
    }

    #[test]
    fn field_prefixes_its_child() {
        let q = extract_infix("title:rust");
        assert_eq!(q.match_expr.as_deref(), Some("title : rust"));
        let q = extract_infix("title:\"rust async\"");
        assert_eq!(q.match_expr.as_deref(), Some("title : \"rust async\""));
    }

    #[test]
    fn and_not_lowers_to_fts_not() {
        let q = extract_infix("docker AND NOT kubernetes");
        assert_eq!(q.match_expr.as_deref(), Some("docker NOT kubernetes"));
        assert!(!q.invert);
        // The negated literal stays out of the semantic text.
        assert_eq!(q.semantic_text, "docker");
    }

    #[test]
    fn root_not_inverts_instead_of_panicking() {
        let q = extract_infix("NOT archived");
        assert_eq!(q.match_expr.as_deref(), Some("archived"));
        assert!(q.invert);
        assert!(q.residuals.is_empty());
        assert_eq!(q.semantic_text, "");
    }

    #[test]
    fn tag_field_is_residual() {
        let q = extract_infix("tags:exam");
        assert!(q.match_expr.is_none());
        assert!(q.scan_all);
        assert_eq!(q.residuals.len(), 1);
    }

    #[test]
    fn tag_conjunct_rides_along_with_fts() {
        let q = extract_infix("report AND lang:rust");
        assert_eq!(q.match_expr.as_deref(), Some("report"));
        assert!(!q.scan_all);
        assert_eq!(q.residuals.len(), 1);
    }

    #[test]
    fn or_with_residual_branch_scans() {
        let q = extract_infix("report OR lang:rust");
        assert!(q.match_expr.is_none());
        assert!(q.scan_all);
        assert_eq!(q.residuals.len(), 1);
    }

    #[test]
    fn equivalent_grammars_lower_identically() {
        let infix = extract_infix("kubernetes AND docker");
        let json_ast =
            json::parse(r#"{"$and":[{"content":"kubernetes"},{"content":"docker"}]}"#).unwrap();
        let json = extract(&json_ast);
        assert_eq!(infix.match_expr, json.match_expr);
        assert_eq!(infix.invert, json.invert);
        assert_eq!(infix.scan_all, json.scan_all);
    }

    #[test]
    fn text_search_extracts_like_text() {
        let json_ast = json::parse(r#"{"$text": {"$search": "needle"}}"#).unwrap();
        let q = extract(&json_ast);
        assert_eq!(q.match_expr.as_deref(), Some("needle"));
    }
}
