//! Global regular expressions shared by a requester with its collectors.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("invalid regular expression \"{0}\": {1}")]
    InvalidRegex(String, String),
    #[error("unknown global regular expression \"{0}\"")]
    Unknown(String),
}

/// How an expression body is matched against a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    /// The value contains the body as a substring.
    TextIncluded,
    /// The value contains any of the delimiter separated substrings.
    AnyIncluded,
    /// The value does not contain the body as a substring.
    TextNotIncluded,
    /// The value matches the body as a regular expression.
    Regex,
    /// The value does not match the body as a regular expression.
    NotRegex,
}

/// A named expression as received from a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub name: String,
    pub body: String,
    pub kind: ExpressionKind,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub case_sensitive: bool,
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone)]
enum Matcher {
    Text { needle: String, case_sensitive: bool, negate: bool },
    Any { needles: Vec<String>, case_sensitive: bool },
    Pattern { regex: Regex, negate: bool },
}

impl Matcher {
    fn compile(expr: &Expression) -> Result<Self, ExpressionError> {
        let fold = |s: &str| {
            if expr.case_sensitive {
                s.to_string()
            } else {
                s.to_lowercase()
            }
        };
        Ok(match expr.kind {
            ExpressionKind::TextIncluded | ExpressionKind::TextNotIncluded => Matcher::Text {
                needle: fold(&expr.body),
                case_sensitive: expr.case_sensitive,
                negate: expr.kind == ExpressionKind::TextNotIncluded,
            },
            ExpressionKind::AnyIncluded => Matcher::Any {
                needles: expr
                    .body
                    .split(expr.delimiter)
                    .filter(|s| !s.is_empty())
                    .map(fold)
                    .collect(),
                case_sensitive: expr.case_sensitive,
            },
            ExpressionKind::Regex | ExpressionKind::NotRegex => Matcher::Pattern {
                regex: RegexBuilder::new(&expr.body)
                    .case_insensitive(!expr.case_sensitive)
                    .build()
                    .map_err(|e| ExpressionError::InvalidRegex(expr.body.clone(), e.to_string()))?,
                negate: expr.kind == ExpressionKind::NotRegex,
            },
        })
    }

    fn is_match(&self, value: &str) -> bool {
        match self {
            Matcher::Text { needle, case_sensitive, negate } => {
                let found = if *case_sensitive {
                    value.contains(needle.as_str())
                } else {
                    value.to_lowercase().contains(needle.as_str())
                };
                found != *negate
            }
            Matcher::Any { needles, case_sensitive } => {
                let value = if *case_sensitive {
                    value.to_string()
                } else {
                    value.to_lowercase()
                };
                needles.iter().any(|n| value.contains(n.as_str()))
            }
            Matcher::Pattern { regex, negate } => regex.is_match(value) != *negate,
        }
    }
}

/// The compiled set of a requester's global expressions.
#[derive(Debug, Clone, Default)]
pub struct GlobalRegexp {
    expressions: Vec<Expression>,
    named: HashMap<String, Vec<Matcher>>,
}

impl GlobalRegexp {
    /// Compiles the given expressions. Expressions sharing a name form a set
    /// that matches only when all of its members match.
    pub fn new(expressions: Vec<Expression>) -> Result<Self, ExpressionError> {
        let mut named: HashMap<String, Vec<Matcher>> = HashMap::new();
        for expr in &expressions {
            named
                .entry(expr.name.clone())
                .or_default()
                .push(Matcher::compile(expr)?);
        }
        Ok(Self { expressions, named })
    }

    /// Returns `true` when this set was built from exactly these expressions.
    pub fn is_same(&self, expressions: &[Expression]) -> bool {
        self.expressions == expressions
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Matches `value` against a pattern. A pattern starting with `@` refers
    /// to a named global expression, anything else is a plain regex.
    pub fn matches(&self, pattern: &str, value: &str) -> Result<bool, ExpressionError> {
        match pattern.strip_prefix('@') {
            Some(name) => {
                let set = self
                    .named
                    .get(name)
                    .ok_or_else(|| ExpressionError::Unknown(name.to_string()))?;
                Ok(set.iter().all(|m| m.is_match(value)))
            }
            None => {
                let regex = Regex::new(pattern)
                    .map_err(|e| ExpressionError::InvalidRegex(pattern.to_string(), e.to_string()))?;
                Ok(regex.is_match(value))
            }
        }
    }
}
