//! ISO 7816-4 Application Identifiers.
//!
//! An [`Aid`] keeps its canonical literal form: uppercase hex digits followed
//! by an optional matching modifier.
//!
//! - no modifier: exact match
//! - `*`: prefix, matches itself and every longer AID sharing its bytes
//! - `#`: subset, matches itself and every shorter AID that is one of its prefixes
//!
//! Ordering is plain lexicographic order over the literal, so a sorted map of
//! AIDs visits a root before every longer AID that shares its digits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AidError;

/// Shortest AID a registration or SELECT may carry, in bytes.
pub const MIN_AID_LEN: usize = 5;

/// Longest AID a registration may carry, in bytes.
pub const MAX_AID_LEN: usize = 16;

/// Matching rule carried by an AID literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AidKind {
    Exact,
    Prefix,
    Subset,
}

impl AidKind {
    pub fn suffix(self) -> Option<char> {
        match self {
            AidKind::Exact => None,
            AidKind::Prefix => Some('*'),
            AidKind::Subset => Some('#'),
        }
    }

    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            '*' => Some(AidKind::Prefix),
            '#' => Some(AidKind::Subset),
            _ => None,
        }
    }
}

/// A canonical (uppercase) AID literal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Aid {
    literal: String,
}

impl Aid {
    /// Parse a registration literal.
    ///
    /// Accepts 10 to 32 hex digits (an even count) with at most one trailing
    /// `*` or `#`. Case is folded to uppercase.
    pub fn parse(literal: &str) -> Result<Self, AidError> {
        if literal.is_empty() {
            return Err(AidError::Empty);
        }
        let upper = literal.to_ascii_uppercase();
        let digits = match upper.chars().last().and_then(AidKind::from_suffix) {
            Some(_) => &upper[..upper.len() - 1],
            None => upper.as_str(),
        };
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AidError::NotHex(literal.to_string()));
        }
        let count = digits.len();
        if count % 2 != 0 || !(MIN_AID_LEN * 2..=MAX_AID_LEN * 2).contains(&count) {
            return Err(AidError::BadLength {
                aid: literal.to_string(),
                digits: count,
            });
        }
        Ok(Self { literal: upper })
    }

    /// Build an exact AID from raw bytes, e.g. the payload of a SELECT command.
    ///
    /// No length check is applied; callers decide what to do with short AIDs.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            literal: hex::encode_upper(bytes),
        }
    }

    pub fn kind(&self) -> AidKind {
        self.literal
            .chars()
            .last()
            .and_then(AidKind::from_suffix)
            .unwrap_or(AidKind::Exact)
    }

    pub fn is_exact(&self) -> bool {
        self.kind() == AidKind::Exact
    }

    pub fn is_prefix(&self) -> bool {
        self.kind() == AidKind::Prefix
    }

    pub fn is_subset(&self) -> bool {
        self.kind() == AidKind::Subset
    }

    /// The full literal including any modifier.
    pub fn as_str(&self) -> &str {
        &self.literal
    }

    /// Hex digits without the modifier.
    pub fn digits(&self) -> &str {
        match self.kind() {
            AidKind::Exact => &self.literal,
            _ => &self.literal[..self.literal.len() - 1],
        }
    }

    /// Length of the AID in bytes, modifier excluded.
    pub fn len_bytes(&self) -> usize {
        self.digits().len() / 2
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(self.digits()).unwrap_or_default()
    }

    /// Same digits under a different matching rule.
    pub fn with_kind(&self, kind: AidKind) -> Self {
        let mut literal = self.digits().to_string();
        if let Some(suffix) = kind.suffix() {
            literal.push(suffix);
        }
        Self { literal }
    }

    pub fn plain(&self) -> Self {
        self.with_kind(AidKind::Exact)
    }

    /// Whether a SELECT for `selected` is covered by this registration.
    pub fn matches(&self, selected: &Aid) -> bool {
        let own = self.digits();
        let other = selected.digits();
        match self.kind() {
            AidKind::Exact => own == other,
            AidKind::Prefix => other.starts_with(own),
            AidKind::Subset => own.starts_with(other),
        }
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aid({})", self.literal)
    }
}

impl FromStr for Aid {
    type Err = AidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Aid {
    type Error = AidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Aid> for String {
    fn from(aid: Aid) -> Self {
        aid.literal
    }
}
