//! Query parsing
//!
//! Turns a human-typed filter such as
//! `info.status == 'COMPLETE' & config.optimizer.lr >= 0.1` into a [`Predicate`]
//! that the record index evaluates without materializing any lazy field.
//!
//! ## Grammar
//!
//! Precedence from lowest to highest:
//! - `|` (or)
//! - `&` (and)
//! - `~` (not)
//! - `<key> <op> <scalar>` and `<key> in [<scalar>, ...]`
//!
//! Parentheses override precedence. Only keys under the `config.` and `info.`
//! namespaces are queryable: metric and artifact fields are loaded lazily and are
//! not part of the index.

mod lexer;
mod predicate;

pub use lexer::CompareOp;
pub use predicate::Predicate;

use lexer::{Token, TokenKind};

use crate::{Error, Result};

/// Key prefixes that can appear in a query.
pub const SEARCHABLE_PREFIXES: [&str; 2] = ["info.", "config."];

/// Returns true if `key` lives in a queryable namespace.
#[must_use]
pub fn is_searchable(key: &str) -> bool {
    SEARCHABLE_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

/// Parses query strings into predicates.
///
/// Implement this trait to give a [`Reader`](crate::Reader) a custom query syntax.
pub trait QueryParser {
    /// Parse a query string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] for malformed input and [`Error::InvalidKey`] for
    /// keys outside the queryable namespaces.
    fn parse(&self, query: &str) -> Result<Predicate>;
}

/// The default recursive-descent parser.
///
/// # Example
///
/// ```
/// use runlog::query::{DefaultParser, QueryParser};
///
/// # fn main() -> runlog::Result<()> {
/// let parser = DefaultParser::new();
/// let predicate = parser.parse("config.seed in [1, 4] & ~ info.status == 'FAILED'")?;
/// assert_eq!(predicate.keys(), vec!["config.seed", "info.status"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl DefaultParser {
    /// Create a new parser
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl QueryParser for DefaultParser {
    fn parse(&self, query: &str) -> Result<Predicate> {
        let tokens = lexer::tokenize(query)?;
        if tokens.is_empty() {
            return Err(Error::Syntax("Empty query".to_string()));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: query.len(),
        };
        let predicate = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(Error::Syntax(format!(
                "Unexpected {} at position {}",
                token.kind.describe(),
                token.offset
            )));
        }
        Ok(predicate)
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Token> {
        let token = self.tokens.get(self.pos).ok_or_else(|| {
            Error::Syntax(format!("Unexpected end of query at position {}", self.end))
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = left | right;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            left = left & right;
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.eat(&TokenKind::Not) {
            let inner = self.parse_not()?;
            return Ok(!inner);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        let token = self.next()?;
        match &token.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                let close = self.next()?;
                if close.kind != TokenKind::RParen {
                    return Err(Error::Syntax(format!(
                        "Expected ')' but found {} at position {}",
                        close.kind.describe(),
                        close.offset
                    )));
                }
                Ok(inner)
            }
            TokenKind::Key(key) => {
                let key = key.clone();
                self.parse_atom(key)
            }
            other => Err(Error::Syntax(format!(
                "Unexpected {} at position {}",
                other.describe(),
                token.offset
            ))),
        }
    }

    fn parse_atom(&mut self, key: String) -> Result<Predicate> {
        let token = self.next()?;
        let predicate = match &token.kind {
            TokenKind::Compare(op) => {
                let op = *op;
                let literal = self.next()?;
                match &literal.kind {
                    TokenKind::Scalar(value) => Predicate::compare(key, op, value.clone()),
                    other => {
                        return Err(Error::Syntax(format!(
                            "Expected a scalar after '{}' but found {} at position {}",
                            op.symbol(),
                            other.describe(),
                            literal.offset
                        )))
                    }
                }
            }
            TokenKind::In => {
                let literal = self.next()?;
                match &literal.kind {
                    TokenKind::List(values) => Predicate::one_of(key, values.clone()),
                    other => {
                        return Err(Error::Syntax(format!(
                            "Expected a list after 'in' but found {} at position {}",
                            other.describe(),
                            literal.offset
                        )))
                    }
                }
            }
            other => {
                return Err(Error::Syntax(format!(
                    "Expected an operator after key '{key}' but found {} at position {}",
                    other.describe(),
                    token.offset
                )))
            }
        };
        check_searchable(predicate_key(&predicate))?;
        Ok(predicate)
    }
}

fn predicate_key(predicate: &Predicate) -> &str {
    match predicate {
        Predicate::Compare { key, .. } | Predicate::OneOf { key, .. } => key,
        _ => "",
    }
}

fn check_searchable(key: &str) -> Result<()> {
    if is_searchable(key) {
        Ok(())
    } else {
        Err(Error::InvalidKey(format!(
            "The key {key} is invalid! Valid keys must start with one of these prefixes: {SEARCHABLE_PREFIXES:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn parse(query: &str) -> Result<Predicate> {
        DefaultParser::new().parse(query)
    }

    #[test]
    fn test_parse_simple_comparison() {
        let predicate = parse("info.status == 'COMPLETE'").unwrap();
        assert_eq!(
            predicate,
            Predicate::compare("info.status", CompareOp::Eq, "COMPLETE")
        );
    }

    #[test]
    fn test_or_binds_weaker_than_and() {
        let predicate = parse("config.a == 1 | config.b == 2 & config.c == 3").unwrap();
        let a = Predicate::compare("config.a", CompareOp::Eq, 1);
        let b = Predicate::compare("config.b", CompareOp::Eq, 2);
        let c = Predicate::compare("config.c", CompareOp::Eq, 3);
        assert_eq!(predicate, a | (b & c));
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let predicate = parse("(config.a == 1 | config.b == 2) & config.c == 3").unwrap();
        let a = Predicate::compare("config.a", CompareOp::Eq, 1);
        let b = Predicate::compare("config.b", CompareOp::Eq, 2);
        let c = Predicate::compare("config.c", CompareOp::Eq, 3);
        assert_eq!(predicate, (a | b) & c);
    }

    #[test]
    fn test_not_binds_tighter_than_and() {
        let predicate = parse("~ config.seed in [1, 4] & info.x == true").unwrap();
        let seed = Predicate::one_of("config.seed", vec![Value::Int(1), Value::Int(4)]);
        let x = Predicate::compare("info.x", CompareOp::Eq, true);
        assert_eq!(predicate, !seed & x);
    }

    #[test]
    fn test_metric_key_is_invalid() {
        let err = parse("train.loss < 0.1").unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
        assert!(err.to_string().contains("train.loss"));
    }

    #[test]
    fn test_artifact_key_is_invalid() {
        assert!(matches!(
            parse("artifact.pickle.x == 1"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_malformed_queries() {
        for query in [
            "config.seed ==",
            "config.seed 0",
            "(config.seed == 0",
            "config.seed == 0)",
            "config.seed == 0 &",
            "config.seed in 3",
            "== 0",
            "config.seed == config.lr",
            "",
            "   ",
        ] {
            assert!(
                matches!(parse(query), Err(Error::Syntax(_))),
                "expected a syntax error for {query:?}"
            );
        }
    }
}
