use thiserror::Error;

pub mod events;
pub mod ids;
pub mod model;

pub use events::OrderingEvent;
pub use ids::{CollectionId, ItemKey, Position, SubjectId};
pub use model::{
    Collection, CollectionView, ItemEntry, ItemMetadata, LibraryEntry, MediaType, NewCollection,
    OrderDirective, RelationEdge, RelationKind,
};

/// Error taxonomy shared by every ordering operation.
///
/// Guard failures (`NotFound`, `Forbidden`, `Conflict`, `InvalidOrder`) are detected before
/// any mutation. `Timeout` and `Storage` mean the whole compound operation was rolled back
/// and may be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShelfError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid order: {message}")]
    InvalidOrder { message: String },

    #[error("Position invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Metadata lookup failed for {key}: {reason}")]
    EnrichmentFailed { key: String, reason: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl ShelfError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn invalid_order(message: impl Into<String>) -> Self {
        Self::InvalidOrder {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShelfError::Timeout { .. } | ShelfError::Storage { .. })
    }
}

pub type Result<T> = std::result::Result<T, ShelfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        assert!(ShelfError::storage("database is locked").is_retryable());
        assert!(ShelfError::Timeout {
            operation: "save".into()
        }
        .is_retryable());
        assert!(!ShelfError::conflict("already saved").is_retryable());
        assert!(!ShelfError::invariant("duplicate position").is_retryable());
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = ShelfError::not_found("collection", "abc");
        assert_eq!(err.to_string(), "collection not found: abc");
    }
}
