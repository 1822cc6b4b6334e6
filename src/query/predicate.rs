//! Composable boolean predicates over flat run documents
//!
//! A [`Predicate`] is the executable form of a parsed query. Sub-expressions
//! combine structurally with `&`, `|` and `!`, so precedence is fixed once by
//! the grammar and never re-derived from strings.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use super::lexer::CompareOp;
use crate::value::Value;

/// Boolean expression over the fields of a run document.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `<key> <op> <scalar>`
    Compare {
        /// Field key
        key: String,
        /// Comparison operator
        op: CompareOp,
        /// Right-hand literal
        value: Value,
    },
    /// `<key> in [<scalar>, ...]`
    OneOf {
        /// Field key
        key: String,
        /// Accepted literals
        values: Vec<Value>,
    },
    /// Conjunction
    And(Box<Predicate>, Box<Predicate>),
    /// Disjunction
    Or(Box<Predicate>, Box<Predicate>),
    /// Negation
    Not(Box<Predicate>),
}

impl Predicate {
    /// Build a comparison atom.
    #[must_use]
    pub fn compare(key: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Build a membership atom.
    #[must_use]
    pub fn one_of(key: impl Into<String>, values: Vec<Value>) -> Self {
        Self::OneOf {
            key: key.into(),
            values,
        }
    }

    /// Evaluate against a flat document.
    ///
    /// A missing field makes an atom false. Ordering comparisons between
    /// incompatible kinds (e.g. a string and a number) are false as well.
    #[must_use]
    pub fn matches(&self, fields: &BTreeMap<String, Value>) -> bool {
        match self {
            Self::Compare { key, op, value } => fields
                .get(key)
                .is_some_and(|field| compare(field, *op, value)),
            Self::OneOf { key, values } => fields
                .get(key)
                .is_some_and(|field| values.iter().any(|v| v == field)),
            Self::And(left, right) => left.matches(fields) && right.matches(fields),
            Self::Or(left, right) => left.matches(fields) || right.matches(fields),
            Self::Not(inner) => !inner.matches(fields),
        }
    }

    /// Every key referenced by the expression, in order of appearance.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            Self::Compare { key, .. } | Self::OneOf { key, .. } => {
                if !keys.contains(&key.as_str()) {
                    keys.push(key);
                }
            }
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_keys(keys);
                right.collect_keys(keys);
            }
            Self::Not(inner) => inner.collect_keys(keys),
        }
    }
}

fn compare(field: &Value, op: CompareOp, literal: &Value) -> bool {
    match op {
        CompareOp::Eq => field == literal,
        CompareOp::Ne => field != literal,
        _ => ordering(field, literal).is_some_and(|ord| match op {
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Eq | CompareOp::Ne => false,
        }),
    }
}

/// Ordering between comparable kinds only.
fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::List(_), Value::List(_)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl BitAnd for Predicate {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }
}

impl BitOr for Predicate {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }
}

impl Not for Predicate {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { key, op, value } => match value {
                Value::Str(s) => write!(f, "{key} {} '{s}'", op.symbol()),
                other => write!(f, "{key} {} {other}", op.symbol()),
            },
            Self::OneOf { key, values } => {
                write!(f, "{key} in [")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match v {
                        Value::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
            Self::And(left, right) => write!(f, "({left} & {right})"),
            Self::Or(left, right) => write!(f, "({left} | {right})"),
            Self::Not(inner) => write!(f, "~{inner}"),
        }
    }
}
