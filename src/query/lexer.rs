//! Tokenizer for the query language
//!
//! Keys match `[A-Za-z_0-9]+(\.[A-Za-z_0-9]+)*`; scalars are integers, floats,
//! quoted strings or (case-insensitive) booleans; `[...]` list literals are
//! evaluated into a list of scalars at lex time. Any other character is a
//! lexical failure.

use crate::value::Value;
use crate::{Error, Result};

/// Comparison operators of the query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Operator symbol as written in a query.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Key(String),
    Scalar(Value),
    List(Vec<Value>),
    Compare(CompareOp),
    In,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Key(key) => format!("key '{key}'"),
            Self::Scalar(value) => format!("scalar '{value}'"),
            Self::List(_) => "list literal".to_string(),
            Self::Compare(op) => format!("'{}'", op.symbol()),
            Self::In => "'in'".to_string(),
            Self::And => "'&'".to_string(),
            Self::Or => "'|'".to_string(),
            Self::Not => "'~'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) offset: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>> {
    Lexer::new(input).run()
}

struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    const fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c == b' ' || c == b'\t' || c == b'\n' || c == b'\r' {
                self.pos += 1;
                continue;
            }
            let offset = self.pos;
            let kind = match c {
                b'&' => self.single(TokenKind::And),
                b'|' => self.single(TokenKind::Or),
                b'~' => self.single(TokenKind::Not),
                b'(' => self.single(TokenKind::LParen),
                b')' => self.single(TokenKind::RParen),
                b'=' | b'!' | b'<' | b'>' => self.operator()?,
                b'[' => TokenKind::List(self.list()?),
                b'\'' | b'"' => TokenKind::Scalar(Value::Str(self.string()?)),
                b'+' | b'-' | b'.' => TokenKind::Scalar(self.number()?),
                c if c.is_ascii_digit() => {
                    if self.digits_start_key() {
                        self.word()?
                    } else {
                        TokenKind::Scalar(self.number()?)
                    }
                }
                c if c.is_ascii_alphabetic() || c == b'_' => self.word()?,
                _ => return Err(self.illegal(offset)),
            };
            tokens.push(Token { kind, offset });
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn illegal(&self, offset: usize) -> Error {
        let c = self.input[offset..].chars().next().unwrap_or('?');
        Error::Syntax(format!("Illegal character '{c}' at position {offset}"))
    }

    fn operator(&mut self) -> Result<TokenKind> {
        let offset = self.pos;
        let first = self.bytes[offset];
        let second = self.peek_at(1);
        let (op, width) = match (first, second) {
            (b'=', Some(b'=')) => (CompareOp::Eq, 2),
            (b'!', Some(b'=')) => (CompareOp::Ne, 2),
            (b'<', Some(b'=')) => (CompareOp::Le, 2),
            (b'>', Some(b'=')) => (CompareOp::Ge, 2),
            (b'<', _) => (CompareOp::Lt, 1),
            (b'>', _) => (CompareOp::Gt, 1),
            _ => return Err(self.illegal(offset)),
        };
        self.pos += width;
        Ok(TokenKind::Compare(op))
    }

    /// A run of digits immediately followed by a letter or underscore starts a key.
    fn digits_start_key(&self) -> bool {
        let mut i = self.pos;
        while i < self.bytes.len() && self.bytes[i].is_ascii_digit() {
            i += 1;
        }
        matches!(self.bytes.get(i), Some(c) if c.is_ascii_alphabetic() || *c == b'_')
    }

    fn word(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        loop {
            let segment_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            if self.pos == segment_start {
                return Err(Error::Syntax(format!(
                    "Empty key segment at position {segment_start}"
                )));
            }
            let continues = self.peek() == Some(b'.')
                && matches!(self.peek_at(1), Some(c) if c.is_ascii_alphanumeric() || c == b'_');
            if !continues {
                break;
            }
            self.pos += 1;
        }
        let text = &self.input[start..self.pos];
        Ok(if text == "in" {
            TokenKind::In
        } else if text.eq_ignore_ascii_case("true") {
            TokenKind::Scalar(Value::Bool(true))
        } else if text.eq_ignore_ascii_case("false") {
            TokenKind::Scalar(Value::Bool(false))
        } else {
            TokenKind::Key(text.to_string())
        })
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        let int_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let has_int = self.pos > int_start;
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            let frac_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
            if !has_int && self.pos == frac_start {
                return Err(self.illegal(start));
            }
        } else if !has_int {
            return Err(self.illegal(start));
        }
        let text = &self.input[start..self.pos];
        let parsed = if is_float {
            text.parse::<f64>().map(Value::Float).ok()
        } else {
            text.parse::<i64>().map(Value::Int).ok()
        };
        parsed.ok_or_else(|| Error::Syntax(format!("Invalid number '{text}' at position {start}")))
    }

    fn string(&mut self) -> Result<String> {
        let start = self.pos;
        let quote = self.bytes[start];
        self.pos += 1;
        let content_start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let content = self.input[content_start..self.pos].to_string();
                self.pos += 1;
                return Ok(content);
            }
            self.pos += 1;
        }
        Err(Error::Syntax(format!(
            "Unterminated string starting at position {start}"
        )))
    }

    fn list(&mut self) -> Result<Vec<Value>> {
        let start = self.pos;
        self.pos += 1;
        let mut items = Vec::new();
        let mut expect_item = true;
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t')) {
                self.pos += 1;
            }
            let Some(c) = self.peek() else {
                return Err(Error::Syntax(format!(
                    "Unterminated list starting at position {start}"
                )));
            };
            match c {
                b']' => {
                    if expect_item && !items.is_empty() {
                        return Err(Error::Syntax(format!(
                            "Trailing comma in list at position {}",
                            self.pos
                        )));
                    }
                    self.pos += 1;
                    return Ok(items);
                }
                b',' if !expect_item => {
                    expect_item = true;
                    self.pos += 1;
                }
                _ if expect_item => {
                    items.push(self.list_item()?);
                    expect_item = false;
                }
                _ => return Err(self.illegal(self.pos)),
            }
        }
    }

    fn list_item(&mut self) -> Result<Value> {
        let offset = self.pos;
        match self.peek() {
            Some(b'\'' | b'"') => self.string().map(Value::Str),
            Some(b'+' | b'-' | b'.') => self.number(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => match self.word()? {
                TokenKind::Scalar(value) => Ok(value),
                _ => Err(Error::Syntax(format!(
                    "List literals may only contain scalars (position {offset})"
                ))),
            },
            _ => Err(self.illegal(offset)),
        }
    }
}
