//! Relation edges between subjects and collections.
//!
//! The three relation kinds live in one table keyed by `(subject, collection)`, so a pair
//! can never hold two kinds at once regardless of what the caller does.

use shelf_api::{CollectionId, RelationEdge, RelationKind, ShelfError, SubjectId};

use crate::storage::{StorageError, StoreTransaction};

pub struct RelationSet;

impl RelationSet {
    pub async fn has_edge(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<RelationKind>, ShelfError> {
        Ok(tx.relation_kind(subject, collection).await?)
    }

    /// Assert `kind` for the pair. Fails with `Conflict` if any edge already exists; an
    /// existing edge of the same kind would otherwise duplicate the library entry.
    pub async fn set_edge(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
        kind: RelationKind,
    ) -> Result<(), ShelfError> {
        let edge = RelationEdge {
            subject,
            collection,
            kind,
        };
        match tx.insert_relation(&edge).await {
            Ok(()) => Ok(()),
            Err(StorageError::DuplicateRelation { .. }) => {
                let existing = tx.relation_kind(subject, collection).await?;
                Err(ShelfError::conflict(format!(
                    "subject {subject} already holds {} on collection {collection}, cannot set {kind}",
                    existing.map(RelationKind::as_str).unwrap_or("an edge"),
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the pair's edge if present. Returns whether an edge was removed.
    pub async fn clear_edge(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<bool, ShelfError> {
        Ok(tx.delete_relation(subject, collection).await?)
    }

    pub async fn edges_for_collection(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
    ) -> Result<Vec<RelationEdge>, ShelfError> {
        Ok(tx.relations_for_collection(collection).await?)
    }

    /// Subjects holding `kind` on the collection, in a stable order.
    pub async fn members(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        kind: RelationKind,
    ) -> Result<Vec<SubjectId>, ShelfError> {
        let mut members: Vec<SubjectId> = tx
            .relations_for_collection(collection)
            .await?
            .into_iter()
            .filter(|edge| edge.kind == kind)
            .map(|edge| edge.subject)
            .collect();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PositionStore};

    #[tokio::test]
    async fn set_edge_refuses_a_second_kind() {
        let store = MemoryStore::new();
        let subject = SubjectId::new();
        let collection = CollectionId::new();
        let mut tx = store.begin().await.unwrap();

        RelationSet::set_edge(tx.as_mut(), subject, collection, RelationKind::Saved)
            .await
            .unwrap();
        let err = RelationSet::set_edge(tx.as_mut(), subject, collection, RelationKind::Owned)
            .await
            .unwrap_err();

        assert!(matches!(err, ShelfError::Conflict { ref message } if message.contains("saved")));
        assert_eq!(
            RelationSet::has_edge(tx.as_mut(), subject, collection)
                .await
                .unwrap(),
            Some(RelationKind::Saved)
        );
    }

    #[tokio::test]
    async fn clear_edge_is_idempotent() {
        let store = MemoryStore::new();
        let subject = SubjectId::new();
        let collection = CollectionId::new();
        let mut tx = store.begin().await.unwrap();

        RelationSet::set_edge(tx.as_mut(), subject, collection, RelationKind::Saved)
            .await
            .unwrap();
        assert!(
            RelationSet::clear_edge(tx.as_mut(), subject, collection)
                .await
                .unwrap()
        );
        assert!(
            !RelationSet::clear_edge(tx.as_mut(), subject, collection)
                .await
                .unwrap()
        );
        assert_eq!(
            RelationSet::has_edge(tx.as_mut(), subject, collection)
                .await
                .unwrap(),
            None
        );
    }
}
