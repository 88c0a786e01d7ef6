//! Glob-style path patterns used by target delegations
//!
//! Patterns are split on `/` into segments. Within a segment `*` matches any
//! run of characters and `?` matches exactly one character; neither crosses a
//! segment boundary. A segment consisting solely of `**` matches any number of
//! whole segments, including none.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Star,
    AnyChar,
    Literal(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `**`
    Deep,
    Glob(Vec<Token>),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "**" {
            return Segment::Deep;
        }
        Segment::Glob(
            raw.chars()
                .map(|c| match c {
                    '*' => Token::Star,
                    '?' => Token::AnyChar,
                    c => Token::Literal(c),
                })
                .collect(),
        )
    }

    fn literal(raw: &str) -> Self {
        Segment::Glob(raw.chars().map(Token::Literal).collect())
    }

    fn is_literal(&self) -> bool {
        match self {
            Segment::Deep => false,
            Segment::Glob(tokens) => tokens.iter().all(|t| matches!(t, Token::Literal(_))),
        }
    }
}

/// A delegation path pattern such as `signing-ca/**/*`
#[derive(Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidPattern("empty pattern".into()));
        }
        if raw.split('/').any(str::is_empty) {
            return Err(Error::InvalidPattern(format!(
                "empty path segment in '{}'",
                raw
            )));
        }
        let segments = raw.split('/').map(Segment::parse).collect();
        Ok(Self { raw, segments })
    }

    /// The pattern selecting everything under a usage category: `<usage>/**/*`
    pub fn for_usage(usage: &str) -> Result<Self> {
        Self::new(format!("{}/**/*", usage))
    }

    /// The pattern text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the concrete target path `name` matches this pattern
    pub fn matches(&self, name: &str) -> bool {
        let name: Vec<Segment> = name.split('/').map(Segment::literal).collect();
        segments_intersect(&self.segments, &name)
    }

    /// Whether some concrete path matches both this pattern and `other`
    pub fn intersects(&self, other: &PathPattern) -> bool {
        segments_intersect(&self.segments, &other.segments)
    }

    /// How narrowly this pattern scopes its delegation
    ///
    /// Compared first by the number of fully literal segments, then by the
    /// number of literal characters.
    pub fn specificity(&self) -> (usize, usize) {
        let literal_segments = self.segments.iter().filter(|s| s.is_literal()).count();
        let literal_chars = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Deep => 0,
                Segment::Glob(tokens) => tokens
                    .iter()
                    .filter(|t| matches!(t, Token::Literal(_)))
                    .count(),
            })
            .sum();
        (literal_segments, literal_chars)
    }
}

fn segments_intersect(a: &[Segment], b: &[Segment]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        (Some(Segment::Deep), _) => {
            segments_intersect(&a[1..], b) || (!b.is_empty() && segments_intersect(a, &b[1..]))
        }
        (_, Some(Segment::Deep)) => {
            segments_intersect(a, &b[1..]) || (!a.is_empty() && segments_intersect(&a[1..], b))
        }
        (None, _) | (_, None) => false,
        (Some(Segment::Glob(x)), Some(Segment::Glob(y))) => {
            tokens_intersect(x, y) && segments_intersect(&a[1..], &b[1..])
        }
    }
}

fn tokens_intersect(a: &[Token], b: &[Token]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        (Some(Token::Star), _) => {
            tokens_intersect(&a[1..], b) || (!b.is_empty() && tokens_intersect(a, &b[1..]))
        }
        (_, Some(Token::Star)) => {
            tokens_intersect(a, &b[1..]) || (!a.is_empty() && tokens_intersect(&a[1..], b))
        }
        (None, _) | (_, None) => false,
        (Some(x), Some(y)) => {
            let compatible = match (x, y) {
                (Token::Literal(l), Token::Literal(r)) => l == r,
                _ => true,
            };
            compatible && tokens_intersect(&a[1..], &b[1..])
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathPattern({:?})", self.raw)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for PathPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PathPattern::new(raw).map_err(serde::de::Error::custom)
    }
}
