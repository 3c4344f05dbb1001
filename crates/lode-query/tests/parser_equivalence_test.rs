//! The two grammars must produce identical ASTs for semantically
//! equivalent inputs.

use lode_query::{infix, json, parse_query, QueryNode};

fn pair(infix_query: &str, json_query: &str) {
    let a = infix::parse(infix_query).unwrap();
    let b = json::parse(json_query).unwrap();
    assert_eq!(a, b, "{infix_query} vs {json_query}");
}

#[test]
fn calibration_pairs() {
    pair("a AND b", r#"{"$and":[{"content":"a"},{"content":"b"}]}"#);
    pair("a OR b", r#"{"$or":[{"content":"a"},{"content":"b"}]}"#);
    pair("NOT a", r#"{"$not":{"content":"a"}}"#);
    pair(
        "NOT (a OR b)",
        r#"{"$nor":[{"content":"a"},{"content":"b"}]}"#,
    );
    pair("title:rust", r#"{"title":"rust"}"#);
    pair(
        "title:rust AND docker",
        r#"{"$and":[{"title":"rust"},{"content":"docker"}]}"#,
    );
    pair(
        "(a OR b) AND c",
        r#"{"$and":[{"$or":[{"content":"a"},{"content":"b"}]},{"content":"c"}]}"#,
    );
}

#[test]
fn dispatch_by_first_character() {
    let from_json = parse_query(r#"  {"content": "a"}"#).unwrap();
    let from_infix = parse_query("a").unwrap();
    assert_eq!(from_json, from_infix);
    assert_eq!(from_infix, QueryNode::Text("a".into()));
}

#[test]
fn implicit_and_matches_explicit_json_and() {
    pair("a b c", r#"{"$and":[{"content":"a"},{"content":"b"},{"content":"c"}]}"#);
}
