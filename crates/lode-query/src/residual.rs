//! In-memory evaluation of query subtrees the FTS engine cannot
//! express.
//!
//! Candidates arriving here are already hydrated, so predicates work
//! directly on the record: token membership for single terms,
//! case-insensitive substring for phrases, exact (case-insensitive)
//! comparison for tag values. No stemming applies on this path.

use lode_core::models::ContentRecord;

use crate::ast::{QueryNode, FTS_FIELDS};

/// Does the record satisfy the predicate subtree?
pub fn matches(node: &QueryNode, record: &ContentRecord) -> bool {
    match node {
        QueryNode::Text(t) | QueryNode::TextSearch(t) => {
            any_field_matches(record, t)
        }
        QueryNode::PhraseExact(t) => {
            [&record.title, &record.description, &record.content]
                .iter()
                .any(|field| phrase_matches(field, t))
        }
        QueryNode::Field(name, child) => field_matches(name, child, record),
        QueryNode::And(children) => children.iter().all(|c| matches(c, record)),
        QueryNode::Or(children) => children.iter().any(|c| matches(c, record)),
        QueryNode::Not(child) => !matches(child, record),
    }
}

fn field_matches(name: &str, child: &QueryNode, record: &ContentRecord) -> bool {
    if FTS_FIELDS.contains(&name) {
        let field = match name {
            "title" => &record.title,
            "description" => &record.description,
            _ => &record.content,
        };
        return text_node_matches(child, field);
    }
    if name == "tags" {
        // `tags:x` matches a key, a value, or the joined `key:value`.
        return match leaf_value(child) {
            Some(term) => record.tags.iter().any(|tag| {
                tag.key.eq_ignore_ascii_case(term)
                    || tag.value.eq_ignore_ascii_case(term)
                    || tag.to_string().eq_ignore_ascii_case(term)
            }),
            None => tag_tree_matches(child, record, |tag, term| {
                tag.key.eq_ignore_ascii_case(term) || tag.value.eq_ignore_ascii_case(term)
            }),
        };
    }
    // Any other field name is treated as a tag key: `lang:rust`
    // matches a record carrying the tag `lang:rust`.
    match leaf_value(child) {
        Some(term) => record
            .tags
            .iter()
            .any(|tag| tag.key.eq_ignore_ascii_case(name) && tag.value.eq_ignore_ascii_case(term)),
        None => tag_tree_matches(child, record, |tag, term| {
            tag.key.eq_ignore_ascii_case(name) && tag.value.eq_ignore_ascii_case(term)
        }),
    }
}

/// Evaluate a boolean subtree whose leaves compare against tags.
fn tag_tree_matches(
    node: &QueryNode,
    record: &ContentRecord,
    leaf: impl Fn(&lode_core::models::Tag, &str) -> bool + Copy,
) -> bool {
    match node {
        QueryNode::Text(t) | QueryNode::PhraseExact(t) | QueryNode::TextSearch(t) => {
            record.tags.iter().any(|tag| leaf(tag, t))
        }
        QueryNode::Field(_, child) => tag_tree_matches(child, record, leaf),
        QueryNode::And(children) => children.iter().all(|c| tag_tree_matches(c, record, leaf)),
        QueryNode::Or(children) => children.iter().any(|c| tag_tree_matches(c, record, leaf)),
        QueryNode::Not(child) => !tag_tree_matches(child, record, leaf),
    }
}

fn text_node_matches(node: &QueryNode, field: &str) -> bool {
    match node {
        QueryNode::Text(t) | QueryNode::TextSearch(t) => term_matches(field, t),
        QueryNode::PhraseExact(t) => phrase_matches(field, t),
        QueryNode::Field(_, child) => text_node_matches(child, field),
        QueryNode::And(children) => children.iter().all(|c| text_node_matches(c, field)),
        QueryNode::Or(children) => children.iter().any(|c| text_node_matches(c, field)),
        QueryNode::Not(child) => !text_node_matches(child, field),
    }
}

fn any_field_matches(record: &ContentRecord, term: &str) -> bool {
    [&record.title, &record.description, &record.content]
        .iter()
        .any(|field| term_matches(field, term))
}

/// Single term: token membership. Multiple words: contiguous phrase.
fn term_matches(haystack: &str, needle: &str) -> bool {
    if needle.split_whitespace().nth(1).is_some() {
        return phrase_matches(haystack, needle);
    }
    let needle = needle.to_lowercase();
    tokens(haystack).any(|token| token == needle)
}

fn phrase_matches(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

fn leaf_value(node: &QueryNode) -> Option<&str> {
    match node {
        QueryNode::Text(t) | QueryNode::PhraseExact(t) | QueryNode::TextSearch(t) => Some(t),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lode_core::models::Tag;

    fn record(content: &str, tags: &[&str]) -> ContentRecord {
        ContentRecord {
            id: "r".into(),
            title: "My Title".into(),
            description: "a description".into(),
            content: content.into(),
            mime_type: String::new(),
            tags: tags.iter().map(|t| Tag::parse(t).unwrap()).collect(),
            source_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn field(name: &str, term: &str) -> QueryNode {
        QueryNode::Field(name.into(), Box::new(QueryNode::Text(term.into())))
    }

    #[test]
    fn bare_term_checks_all_fields() {
        let r = record("body words", &[]);
        assert!(matches(&QueryNode::Text("title".into()), &r));
        assert!(matches(&QueryNode::Text("body".into()), &r));
        assert!(!matches(&QueryNode::Text("absent".into()), &r));
    }

    #[test]
    fn term_matching_is_token_exact() {
        let r = record("kubernetes cluster", &[]);
        assert!(matches(&QueryNode::Text("kubernetes".into()), &r));
        // Substrings of tokens do not match.
        assert!(!matches(&QueryNode::Text("kube".into()), &r));
    }

    #[test]
    fn tags_field_matches_key_value_or_pair() {
        let r = record("", &["topic:exam", "lang:rust"]);
        assert!(matches(&field("tags", "exam"), &r));
        assert!(matches(&field("tags", "topic"), &r));
        assert!(matches(&field("tags", "topic:exam"), &r));
        assert!(!matches(&field("tags", "biology"), &r));
    }

    #[test]
    fn unknown_field_is_a_tag_key() {
        let r = record("", &["lang:Rust"]);
        assert!(matches(&field("lang", "rust"), &r));
        assert!(matches(&field("LANG", "RUST"), &r));
        assert!(!matches(&field("lang", "go"), &r));
        assert!(!matches(&field("framework", "rust"), &r));
    }

    #[test]
    fn boolean_combinators() {
        let r = record("alpha beta", &[]);
        let both = QueryNode::And(vec![
            QueryNode::Text("alpha".into()),
            QueryNode::Text("beta".into()),
        ]);
        assert!(matches(&both, &r));

        let either = QueryNode::Or(vec![
            QueryNode::Text("alpha".into()),
            QueryNode::Text("missing".into()),
        ]);
        assert!(matches(&either, &r));

        let negated = QueryNode::Not(Box::new(QueryNode::Text("alpha".into())));
        assert!(!matches(&negated, &r));
    }

    #[test]
    fn phrase_requires_contiguity() {
        let r = record("the quick brown fox", &[]);
        assert!(matches(&QueryNode::PhraseExact("quick brown".into()), &r));
        assert!(!matches(&QueryNode::PhraseExact("quick fox".into()), &r));
    }

    #[test]
    fn field_scoping_limits_the_search() {
        let r = record("body only", &[]);
        assert!(matches(&field("title", "Title"), &r));
        assert!(!matches(&field("title", "body"), &r));
        assert!(matches(&field("content", "body"), &r));
    }
}
