//! Typed identifiers and the integer position type.
//!
//! Identifiers arrive from the request layer as strings. They are parsed once, at the
//! boundary, and carried as distinct types from then on so a subject id can never be
//! passed where a collection id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ShelfError;

/// An account whose personal library ordering is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a subject id received from the request layer.
    ///
    /// A malformed id cannot name an existing subject, so it is reported as `NotFound`.
    pub fn parse(raw: &str) -> Result<Self, ShelfError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| ShelfError::not_found("subject", raw))
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named, ordered group of items with exactly one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub Uuid);

impl CollectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, ShelfError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| ShelfError::not_found("collection", raw))
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque key of an item as assigned by the external catalog (e.g. `movie:603`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    /// Keys are opaque, so they are taken verbatim. Empty keys and keys with surrounding
    /// whitespace are rejected.
    pub fn parse(raw: &str) -> Result<Self, ShelfError> {
        if raw.is_empty() || raw.trim() != raw {
            return Err(ShelfError::not_found("item", raw));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-based slot in a library or collection ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Position(u32);

impl Position {
    pub const HEAD: Position = Position(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Position of the slot at `index` in a dense sequence.
    pub fn from_index(index: usize) -> Result<Self, ShelfError> {
        u32::try_from(index)
            .map(Self)
            .map_err(|_| ShelfError::invariant(format!("position {index} out of range")))
    }

    /// Convert a stored integer back into a position. Negative values only exist while a
    /// shift is in flight, so seeing one outside a transaction is an invariant violation.
    pub fn from_stored(raw: i64) -> Result<Self, ShelfError> {
        u32::try_from(raw)
            .map(Self)
            .map_err(|_| ShelfError::invariant(format!("stored position {raw} is not valid")))
    }
}

impl From<Position> for i64 {
    fn from(position: Position) -> Self {
        i64::from(position.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
