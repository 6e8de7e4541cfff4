use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CollectionId, ItemKey, Position, ShelfError, SubjectId};

/// Relationship a subject can hold with a collection. At most one per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Owned,
    Collaborator,
    Saved,
}

impl RelationKind {
    pub const ALL: [RelationKind; 3] = [
        RelationKind::Owned,
        RelationKind::Collaborator,
        RelationKind::Saved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Owned => "owned",
            RelationKind::Collaborator => "collaborator",
            RelationKind::Saved => "saved",
        }
    }

    /// Owners and collaborators may change the items of a collection.
    pub fn can_edit_items(self) -> bool {
        matches!(self, RelationKind::Owned | RelationKind::Collaborator)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationKind {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owned" => Ok(RelationKind::Owned),
            "collaborator" => Ok(RelationKind::Collaborator),
            "saved" => Ok(RelationKind::Saved),
            other => Err(ShelfError::invariant(format!(
                "unknown relation kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => Err(ShelfError::not_found("media type", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub owner: SubjectId,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request payload for creating a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCollection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl NewCollection {
    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_public: true,
        }
    }

    pub fn private(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_public: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationEdge {
    pub subject: SubjectId,
    pub collection: CollectionId,
    pub kind: RelationKind,
}

/// One slot of a subject's library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub subject: SubjectId,
    pub collection: CollectionId,
    pub kind: RelationKind,
    pub position: Position,
}

/// Display metadata cached with an item at insertion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub title: String,
    pub media_type: MediaType,
    pub poster_url: Option<String>,
    pub release_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntry {
    pub collection: CollectionId,
    pub key: ItemKey,
    pub metadata: ItemMetadata,
    pub position: Position,
    pub added_by: SubjectId,
    pub added_at: DateTime<Utc>,
}

/// Where a single-item move should place the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirective {
    First,
    Last,
}

impl FromStr for OrderDirective {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(OrderDirective::First),
            "last" => Ok(OrderDirective::Last),
            other => Err(ShelfError::invalid_order(format!(
                "unknown move directive '{other}', expected 'first' or 'last'"
            ))),
        }
    }
}

/// Fully materialized collection as returned to the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionView {
    pub collection: Collection,
    /// Items sorted by ascending position.
    pub items: Vec<ItemEntry>,
    /// The requesting subject's relation to this collection, if any.
    pub viewer_relation: Option<RelationKind>,
    pub collaborators: Vec<SubjectId>,
}

impl CollectionView {
    pub fn item_keys(&self) -> Vec<ItemKey> {
        self.items.iter().map(|item| item.key.clone()).collect()
    }

    pub fn is_saved(&self) -> bool {
        self.viewer_relation == Some(RelationKind::Saved)
    }
}
