//! Mongo-style JSON query parser.
//!
//! Recognized shapes: `{"field": "value"}`, `{"$and": […]}`,
//! `{"$or": […]}`, `{"$not": doc}`, `{"$nor": […]}`, and
//! `{"$text": {"$search": "…"}}`. Unknown operators are errors.
//! Multiple keys in one document combine as an implicit `$and`.

use serde_json::Value;

use lode_core::constants::MAX_QUERY_DEPTH;
use lode_core::{LodeError, LodeResult};

use crate::ast::{QueryNode, DEFAULT_FIELD};

fn syntax_err(position: usize, message: impl Into<String>) -> LodeError {
    LodeError::QuerySyntax {
        position,
        message: message.into(),
    }
}

/// Parse a JSON query document into the shared AST.
pub fn parse(input: &str) -> LodeResult<QueryNode> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| syntax_err(e.column().saturating_sub(1), e.to_string()))?;
    let node = walk(&value, 1)?;
    node.validate_complexity()?;
    Ok(node)
}

fn walk(value: &Value, depth: usize) -> LodeResult<QueryNode> {
    if depth > MAX_QUERY_DEPTH {
        return Err(LodeError::QueryTooComplex {
            limit: format!("depth exceeds {MAX_QUERY_DEPTH}"),
        });
    }
    let Value::Object(doc) = value else {
        return Err(syntax_err(0, "query document must be a JSON object"));
    };
    if doc.is_empty() {
        return Err(syntax_err(0, "empty query document"));
    }

    let mut clauses = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        clauses.push(clause(key, value, depth)?);
    }
    Ok(if clauses.len() == 1 {
        clauses.pop().expect("non-empty")
    } else {
        QueryNode::And(clauses)
    })
}

fn clause(key: &str, value: &Value, depth: usize) -> LodeResult<QueryNode> {
    match key {
        "$and" => combine(key, value, depth).map(|children| single_or(QueryNode::And, children)),
        "$or" => combine(key, value, depth).map(|children| single_or(QueryNode::Or, children)),
        "$nor" => combine(key, value, depth).map(|children| {
            QueryNode::Not(Box::new(single_or(QueryNode::Or, children)))
        }),
        "$not" => Ok(QueryNode::Not(Box::new(walk(value, depth + 1)?))),
        "$text" => text_search(value),
        key if key.starts_with('$') => {
            Err(syntax_err(0, format!("unknown operator '{key}'")))
        }
        field => {
            let Value::String(text) = value else {
                return Err(syntax_err(
                    0,
                    format!("field '{field}' requires a string value"),
                ));
            };
            let leaf = QueryNode::Text(text.clone());
            let field = field.to_lowercase();
            if field == DEFAULT_FIELD {
                // The default field collapses so both grammars produce
                // identical trees for equivalent inputs.
                Ok(leaf)
            } else {
                Ok(QueryNode::Field(field, Box::new(leaf)))
            }
        }
    }
}

fn combine(operator: &str, value: &Value, depth: usize) -> LodeResult<Vec<QueryNode>> {
    let Value::Array(items) = value else {
        return Err(syntax_err(0, format!("{operator} requires an array")));
    };
    if items.is_empty() {
        return Err(syntax_err(0, format!("{operator} requires at least one clause")));
    }
    items.iter().map(|item| walk(item, depth + 1)).collect()
}

/// A one-element combination collapses to its child; the AST keeps
/// n-ary nodes at two or more children.
fn single_or(
    build: impl FnOnce(Vec<QueryNode>) -> QueryNode,
    mut children: Vec<QueryNode>,
) -> QueryNode {
    if children.len() == 1 {
        children.pop().expect("non-empty")
    } else {
        build(children)
    }
}

fn text_search(value: &Value) -> LodeResult<QueryNode> {
    let Value::Object(doc) = value else {
        return Err(syntax_err(0, "$text requires an object"));
    };
    let Some(Value::String(search)) = doc.get("$search") else {
        return Err(syntax_err(0, "$text requires a $search string"));
    };
    if doc.len() != 1 {
        return Err(syntax_err(0, "$text supports only $search"));
    }
    Ok(QueryNode::TextSearch(search.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> QueryNode {
        QueryNode::Text(s.into())
    }

    #[test]
    fn bare_field_equality() {
        assert_eq!(
            parse(r#"{"title": "rust"}"#).unwrap(),
            QueryNode::Field("title".into(), Box::new(text("rust")))
        );
    }

    #[test]
    fn content_field_collapses() {
        assert_eq!(parse(r#"{"content": "a"}"#).unwrap(), text("a"));
    }

    #[test]
    fn and_or_shapes() {
        assert_eq!(
            parse(r#"{"$and": [{"content": "a"}, {"content": "b"}]}"#).unwrap(),
            QueryNode::And(vec![text("a"), text("b")])
        );
        assert_eq!(
            parse(r#"{"$or": [{"content": "a"}, {"content": "b"}]}"#).unwrap(),
            QueryNode::Or(vec![text("a"), text("b")])
        );
    }

    #[test]
    fn not_and_nor() {
        assert_eq!(
            parse(r#"{"$not": {"content": "a"}}"#).unwrap(),
            QueryNode::Not(Box::new(text("a")))
        );
        assert_eq!(
            parse(r#"{"$nor": [{"content": "a"}, {"content": "b"}]}"#).unwrap(),
            QueryNode::Not(Box::new(QueryNode::Or(vec![text("a"), text("b")])))
        );
    }

    #[test]
    fn text_search_escape_hatch() {
        assert_eq!(
            parse(r#"{"$text": {"$search": "needle"}}"#).unwrap(),
            QueryNode::TextSearch("needle".into())
        );
    }

    #[test]
    fn multiple_keys_are_implicit_and() {
        assert_eq!(
            parse(r#"{"title": "a", "description": "b"}"#).unwrap(),
            QueryNode::And(vec![
                QueryNode::Field("title".into(), Box::new(text("a"))),
                QueryNode::Field("description".into(), Box::new(text("b"))),
            ])
        );
    }

    #[test]
    fn unknown_operator_is_an_error() {
        assert!(matches!(
            parse(r#"{"$regex": "x"}"#),
            Err(LodeError::QuerySyntax { .. })
        ));
    }

    #[test]
    fn malformed_json_reports_position() {
        match parse(r#"{"title": }"#).unwrap_err() {
            LodeError::QuerySyntax { position, .. } => assert!(position > 0),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn non_string_field_value_rejected() {
        assert!(parse(r#"{"title": 42}"#).is_err());
        assert!(parse(r#"{"title": ["a"]}"#).is_err());
    }

    #[test]
    fn nested_not_depth_limit() {
        // Ten $not levels around a leaf: depth 11, rejected.
        let mut query = r#"{"content": "a"}"#.to_string();
        for _ in 0..MAX_QUERY_DEPTH {
            query = format!(r#"{{"$not": {query}}}"#);
        }
        assert!(matches!(
            parse(&query),
            Err(LodeError::QueryTooComplex { .. })
        ));
    }

    #[test]
    fn single_element_combinators_collapse() {
        assert_eq!(parse(r#"{"$and": [{"content": "a"}]}"#).unwrap(), text("a"));
        assert_eq!(
            parse(r#"{"$nor": [{"content": "a"}]}"#).unwrap(),
            QueryNode::Not(Box::new(text("a")))
        );
    }
}
