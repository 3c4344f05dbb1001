//! Infix query parser.
//!
//! Case-insensitive `AND`/`OR`/`NOT` with precedence NOT > AND > OR,
//! parentheses, single- or double-quoted phrases, and `field:value`
//! qualifiers. Adjacent terms without an operator are an implicit
//! `AND`. Syntax errors carry a caret position into the input.

use std::time::Instant;

use lode_core::constants::{MAX_QUERY_DEPTH, PARSE_TIMEOUT};
use lode_core::{LodeError, LodeResult};

use crate::ast::{QueryNode, DEFAULT_FIELD};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Colon,
    Word(String),
    Quoted(String),
}

#[derive(Debug, Clone)]
struct Lexed {
    token: Token,
    pos: usize,
}

fn syntax_err(position: usize, message: impl Into<String>) -> LodeError {
    LodeError::QuerySyntax {
        position,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> LodeResult<Vec<Lexed>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Lexed {
                    token: Token::LParen,
                    pos,
                });
            }
            ')' => {
                chars.next();
                tokens.push(Lexed {
                    token: Token::RParen,
                    pos,
                });
            }
            ':' => {
                chars.next();
                tokens.push(Lexed {
                    token: Token::Colon,
                    pos,
                });
            }
            quote @ ('"' | '\'') => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(syntax_err(pos, "unterminated quote"));
                }
                tokens.push(Lexed {
                    token: Token::Quoted(value),
                    pos,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | ':' | '"' | '\'') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Lexed {
                    token: Token::Word(word),
                    pos,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    deadline: Instant,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Lexed> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Lexed> {
        let lexed = self.tokens.get(self.pos).cloned();
        if lexed.is_some() {
            self.pos += 1;
        }
        lexed
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Lexed { token: Token::Word(w), .. }) if w.eq_ignore_ascii_case(keyword))
    }

    fn check_deadline(&self) -> LodeResult<()> {
        if Instant::now() >= self.deadline {
            return Err(LodeError::QueryTooComplex {
                limit: "parse timeout exceeded".into(),
            });
        }
        Ok(())
    }

    fn guard_depth(&self, depth: usize) -> LodeResult<()> {
        // Bounds recursion before the post-parse depth check runs.
        if depth > MAX_QUERY_DEPTH {
            return Err(LodeError::QueryTooComplex {
                limit: format!("depth exceeds {MAX_QUERY_DEPTH}"),
            });
        }
        Ok(())
    }

    fn parse_or(&mut self, depth: usize) -> LodeResult<QueryNode> {
        self.guard_depth(depth)?;
        let mut parts = vec![self.parse_and(depth)?];
        while self.peek_keyword("or") {
            self.check_deadline()?;
            self.pos += 1;
            parts.push(self.parse_and(depth)?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            QueryNode::Or(parts)
        })
    }

    fn parse_and(&mut self, depth: usize) -> LodeResult<QueryNode> {
        let mut parts = vec![self.parse_unary(depth)?];
        loop {
            self.check_deadline()?;
            if self.peek_keyword("and") {
                self.pos += 1;
                parts.push(self.parse_unary(depth)?);
                continue;
            }
            // A bare whitespace-separated sequence is an implicit AND.
            let adjacent = match self.peek() {
                Some(Lexed {
                    token: Token::LParen | Token::Quoted(_),
                    ..
                }) => true,
                Some(Lexed {
                    token: Token::Word(w),
                    ..
                }) => !w.eq_ignore_ascii_case("or"),
                _ => false,
            };
            if adjacent {
                parts.push(self.parse_unary(depth)?);
            } else {
                break;
            }
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            QueryNode::And(parts)
        })
    }

    fn parse_unary(&mut self, depth: usize) -> LodeResult<QueryNode> {
        if self.peek_keyword("not") {
            self.guard_depth(depth + 1)?;
            self.pos += 1;
            let child = self.parse_unary(depth + 1)?;
            return Ok(QueryNode::Not(Box::new(child)));
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> LodeResult<QueryNode> {
        let Some(lexed) = self.advance() else {
            return Err(syntax_err(self.input_len, "expected a term"));
        };
        match lexed.token {
            Token::LParen => {
                let node = self.parse_or(depth + 1)?;
                match self.advance() {
                    Some(Lexed {
                        token: Token::RParen,
                        ..
                    }) => Ok(node),
                    Some(other) => Err(syntax_err(other.pos, "expected ')'")),
                    None => Err(syntax_err(self.input_len, "unclosed '('")),
                }
            }
            Token::RParen => Err(syntax_err(lexed.pos, "unexpected ')'")),
            Token::Colon => Err(syntax_err(lexed.pos, "unexpected ':'")),
            // A quoted string is literal: 'AND' and "AND" are terms.
            Token::Quoted(value) => Ok(QueryNode::PhraseExact(value)),
            Token::Word(word) => {
                if word.eq_ignore_ascii_case("and") || word.eq_ignore_ascii_case("or") {
                    return Err(syntax_err(lexed.pos, format!("'{word}' is not a term")));
                }
                let followed_by_colon = matches!(
                    self.peek(),
                    Some(Lexed {
                        token: Token::Colon,
                        ..
                    })
                );
                if !followed_by_colon {
                    return Ok(QueryNode::Text(word));
                }
                self.pos += 1; // consume ':'
                let value = match self.advance() {
                    Some(Lexed {
                        token: Token::Word(v),
                        ..
                    }) => QueryNode::Text(v),
                    Some(Lexed {
                        token: Token::Quoted(v),
                        ..
                    }) => QueryNode::PhraseExact(v),
                    Some(other) => {
                        return Err(syntax_err(other.pos, "expected a value after ':'"))
                    }
                    None => return Err(syntax_err(self.input_len, "expected a value after ':'")),
                };
                let field = word.to_lowercase();
                if field == DEFAULT_FIELD {
                    // `content:` is the default field; collapsing keeps
                    // the two grammars producing identical trees.
                    Ok(value)
                } else {
                    Ok(QueryNode::Field(field, Box::new(value)))
                }
            }
        }
    }
}

/// Parse an infix query string into the shared AST.
pub fn parse(input: &str) -> LodeResult<QueryNode> {
    parse_with_timeout(input, PARSE_TIMEOUT)
}

/// Parse with a caller-supplied budget.
pub fn parse_with_timeout(input: &str, timeout: std::time::Duration) -> LodeResult<QueryNode> {
    if input.trim().is_empty() {
        return Err(syntax_err(0, "empty query"));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        deadline: Instant::now() + timeout,
        input_len: input.len(),
    };
    let node = parser.parse_or(1)?;
    if let Some(rest) = parser.peek() {
        return Err(syntax_err(rest.pos, "unexpected trailing input"));
    }
    node.validate_complexity()?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> QueryNode {
        QueryNode::Text(s.into())
    }

    #[test]
    fn bare_term() {
        assert_eq!(parse("kubernetes").unwrap(), text("kubernetes"));
    }

    #[test]
    fn explicit_and_is_case_insensitive() {
        let expected = QueryNode::And(vec![text("a"), text("b")]);
        assert_eq!(parse("a AND b").unwrap(), expected);
        assert_eq!(parse("a and b").unwrap(), expected);
        assert_eq!(parse("a AnD b").unwrap(), expected);
    }

    #[test]
    fn whitespace_sequence_is_implicit_and() {
        assert_eq!(
            parse("alpha beta gamma").unwrap(),
            QueryNode::And(vec![text("alpha"), text("beta"), text("gamma")])
        );
    }

    #[test]
    fn precedence_not_over_and_over_or() {
        // NOT a AND b OR c  ==  ((NOT a) AND b) OR c
        let expected = QueryNode::Or(vec![
            QueryNode::And(vec![QueryNode::Not(Box::new(text("a"))), text("b")]),
            text("c"),
        ]);
        assert_eq!(parse("NOT a AND b OR c").unwrap(), expected);
    }

    #[test]
    fn parentheses_group() {
        // a AND (b OR c)
        let expected = QueryNode::And(vec![
            text("a"),
            QueryNode::Or(vec![text("b"), text("c")]),
        ]);
        assert_eq!(parse("a AND (b OR c)").unwrap(), expected);
    }

    #[test]
    fn field_qualifier_binds_one_term() {
        assert_eq!(
            parse("title:rust").unwrap(),
            QueryNode::Field("title".into(), Box::new(text("rust")))
        );
        assert_eq!(
            parse("title:\"rust async\"").unwrap(),
            QueryNode::Field(
                "title".into(),
                Box::new(QueryNode::PhraseExact("rust async".into()))
            )
        );
    }

    #[test]
    fn content_field_collapses_to_bare_term() {
        assert_eq!(parse("content:summaries").unwrap(), text("summaries"));
        assert_eq!(parse("summaries").unwrap(), text("summaries"));
    }

    #[test]
    fn quoted_reserved_words_are_literals() {
        assert_eq!(
            parse("'AND'").unwrap(),
            QueryNode::PhraseExact("AND".into())
        );
        assert_eq!(
            parse("\"AND\"").unwrap(),
            QueryNode::PhraseExact("AND".into())
        );
    }

    #[test]
    fn phrases_keep_operators_literal() {
        assert_eq!(
            parse("\"alpha AND beta\"").unwrap(),
            QueryNode::PhraseExact("alpha AND beta".into())
        );
    }

    #[test]
    fn top_level_not() {
        assert_eq!(
            parse("NOT archived").unwrap(),
            QueryNode::Not(Box::new(text("archived")))
        );
    }

    #[test]
    fn syntax_errors_carry_positions() {
        match parse("a AND ") {
            Err(LodeError::QuerySyntax { position, .. }) => assert_eq!(position, 6),
            other => panic!("expected syntax error, got {other:?}"),
        }
        match parse("(a OR b").unwrap_err() {
            LodeError::QuerySyntax { position, .. } => assert_eq!(position, 7),
            other => panic!("expected syntax error, got {other:?}"),
        }
        match parse("a ) b").unwrap_err() {
            LodeError::QuerySyntax { position, .. } => assert_eq!(position, 2),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(matches!(
            parse("\"open ended"),
            Err(LodeError::QuerySyntax { .. })
        ));
    }

    #[test]
    fn deep_nesting_hits_the_complexity_limit() {
        let query = format!("{}a{}", "NOT ".repeat(MAX_QUERY_DEPTH), "");
        assert!(matches!(
            parse(&query),
            Err(LodeError::QueryTooComplex { .. })
        ));
        let acceptable = format!("{}a", "NOT ".repeat(MAX_QUERY_DEPTH - 1));
        assert!(parse(&acceptable).is_ok());
    }

    #[test]
    fn tag_like_field_names_parse() {
        assert_eq!(
            parse("tags:exam").unwrap(),
            QueryNode::Field("tags".into(), Box::new(text("exam")))
        );
        assert_eq!(
            parse("lang:rust").unwrap(),
            QueryNode::Field("lang".into(), Box::new(text("rust")))
        );
    }
}
