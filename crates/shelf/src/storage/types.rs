use shelf_api::{Position, ShelfError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Relation already exists for subject {subject} and collection {collection}")]
    DuplicateRelation { subject: String, collection: String },

    #[error("Item {key} already exists in collection {collection}")]
    DuplicateItem { collection: String, key: String },

    #[error("Position collision in {scope}: {detail}")]
    PositionCollision { scope: String, detail: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for ShelfError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => ShelfError::NotFound { entity, id },
            StorageError::DuplicateRelation { .. } | StorageError::DuplicateItem { .. } => {
                ShelfError::conflict(err.to_string())
            }
            StorageError::PositionCollision { .. } | StorageError::SerializationError(_) => {
                ShelfError::invariant(err.to_string())
            }
            StorageError::DatabaseError(message) => ShelfError::Storage { message },
        }
    }
}

impl From<ShelfError> for StorageError {
    fn from(err: ShelfError) -> Self {
        match err {
            ShelfError::NotFound { entity, id } => StorageError::NotFound { entity, id },
            ShelfError::InvariantViolation { message } => StorageError::PositionCollision {
                scope: "positions".to_string(),
                detail: message,
            },
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

/// Direction of a block shift over a position span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Up,
    Down,
}

impl Shift {
    pub fn delta(self) -> i64 {
        match self {
            Shift::Up => 1,
            Shift::Down => -1,
        }
    }

    pub fn apply(self, position: Position) -> Result<Position> {
        match self {
            Shift::Up => Ok(position.next()),
            Shift::Down => position
                .value()
                .checked_sub(1)
                .map(Position::new)
                .ok_or_else(|| StorageError::PositionCollision {
                    scope: "shift".to_string(),
                    detail: "cannot shift position 0 down".to_string(),
                }),
        }
    }
}

/// Half-open span of positions `[from, until)`; `until: None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSpan {
    pub from: Position,
    pub until: Option<Position>,
}

impl PositionSpan {
    /// Every position.
    pub fn all() -> Self {
        Self {
            from: Position::HEAD,
            until: None,
        }
    }

    /// Positions strictly below `position`.
    pub fn below(position: Position) -> Self {
        Self {
            from: Position::HEAD,
            until: Some(position),
        }
    }

    /// Positions strictly above `position`.
    pub fn above(position: Position) -> Self {
        Self {
            from: position.next(),
            until: None,
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        position >= self.from && self.until.is_none_or(|until| position < until)
    }

    pub(crate) fn upper_bound(&self) -> i64 {
        self.until.map(i64::from).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_bounds_are_half_open() {
        let below = PositionSpan::below(Position::new(2));
        assert!(below.contains(Position::new(0)));
        assert!(below.contains(Position::new(1)));
        assert!(!below.contains(Position::new(2)));

        let above = PositionSpan::above(Position::new(2));
        assert!(!above.contains(Position::new(2)));
        assert!(above.contains(Position::new(3)));
        assert!(above.contains(Position::new(u32::MAX)));
    }

    #[test]
    fn shifting_head_down_is_rejected() {
        assert!(Shift::Down.apply(Position::HEAD).is_err());
        assert_eq!(Shift::Up.apply(Position::HEAD).unwrap(), Position::new(1));
    }

    #[test]
    fn collisions_surface_as_invariant_violations() {
        let err: ShelfError = StorageError::PositionCollision {
            scope: "library".into(),
            detail: "two entries at 0".into(),
        }
        .into();
        assert!(matches!(err, ShelfError::InvariantViolation { .. }));

        let err: ShelfError = StorageError::DatabaseError("database is locked".into()).into();
        assert!(err.is_retryable());
    }
}
