//! Relation transitions between subjects and collections.
//!
//! Each (subject, collection) pair moves through `{none, owned, collaborator, saved}`. Every
//! transition checks its guards first and then changes the relation edge and the subject's
//! library ledger inside one transaction, so the library stays dense at every commit.

use chrono::Utc;
use shelf_api::{
    Collection, CollectionId, LibraryEntry, NewCollection, OrderingEvent, RelationKind,
    ShelfError, SubjectId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::events::EventBus;
use crate::ledger::LibraryLedger;
use crate::relations::RelationSet;
use crate::storage::{PositionStore, StoreTransaction};

/// Run `operation` under `limit`, mapping expiry to the retryable `Timeout`.
///
/// The operation's transaction is dropped with the future on expiry and rolls back.
pub(crate) async fn bounded<T, F>(
    component: &str,
    operation: &'static str,
    limit: Duration,
    work: F,
) -> Result<T, ShelfError>
where
    F: Future<Output = Result<T, ShelfError>>,
{
    let result = match timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!("[{component}] {operation} exceeded {limit:?}, rolled back");
            return Err(ShelfError::Timeout {
                operation: operation.to_string(),
            });
        }
    };
    if let Err(ShelfError::InvariantViolation { message }) = &result {
        error!("[{component}] {operation} hit a position invariant violation: {message}");
    }
    result
}

/// Load the collection or fail with `NotFound`.
pub(crate) async fn require_collection(
    tx: &mut dyn StoreTransaction,
    collection: CollectionId,
) -> Result<Collection, ShelfError> {
    tx.get_collection(collection)
        .await?
        .ok_or_else(|| ShelfError::not_found("collection", collection))
}

pub struct RelationCoordinator {
    store: Arc<dyn PositionStore>,
    events: EventBus,
    operation_timeout: Duration,
}

impl RelationCoordinator {
    pub fn new(store: Arc<dyn PositionStore>, events: EventBus, operation_timeout: Duration) -> Self {
        Self {
            store,
            events,
            operation_timeout,
        }
    }

    /// Add `subject` to the directory of known subjects. Idempotent.
    pub async fn register_subject(&self, subject: SubjectId) -> Result<(), ShelfError> {
        self.run("register_subject", async {
            let mut tx = self.store.begin().await?;
            tx.register_subject(subject).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Create a collection owned by `owner` and place it at the head of the owner's library.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_collection(
        &self,
        owner: SubjectId,
        request: NewCollection,
    ) -> Result<Collection, ShelfError> {
        let collection = self.run("create_collection", async {
            let collection = Collection {
                id: CollectionId::new(),
                owner,
                name: request.name,
                description: request.description,
                is_public: request.is_public,
                thumbnail_url: None,
                created_at: Utc::now(),
            };
            let mut tx = self.store.begin().await?;
            tx.insert_collection(&collection).await?;
            RelationSet::set_edge(tx.as_mut(), owner, collection.id, RelationKind::Owned).await?;
            LibraryLedger::insert_at_head(tx.as_mut(), owner, collection.id).await?;
            tx.commit().await?;
            Ok(collection)
        })
        .await?;

        info!("[RelationCoordinator] {owner} created collection {}", collection.id);
        self.events.emit(OrderingEvent::LibraryChanged { subject: owner });
        Ok(collection)
    }

    /// Save a public collection owned by someone else. Returns the collection's savers.
    #[instrument(skip(self))]
    pub async fn save(
        &self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Vec<SubjectId>, ShelfError> {
        let savers = self.run("save", async {
            let mut tx = self.store.begin().await?;
            let record = require_collection(tx.as_mut(), collection).await?;
            if !record.is_public {
                return Err(ShelfError::forbidden(format!(
                    "collection {collection} is private"
                )));
            }
            if record.owner == subject {
                return Err(ShelfError::conflict(format!(
                    "subject {subject} owns collection {collection}"
                )));
            }
            if let Some(kind) = RelationSet::has_edge(tx.as_mut(), subject, collection).await? {
                return Err(ShelfError::conflict(format!(
                    "subject {subject} already holds {kind} on collection {collection}"
                )));
            }

            RelationSet::set_edge(tx.as_mut(), subject, collection, RelationKind::Saved).await?;
            LibraryLedger::insert_at_head(tx.as_mut(), subject, collection).await?;
            let savers = RelationSet::members(tx.as_mut(), collection, RelationKind::Saved).await?;
            tx.commit().await?;
            Ok(savers)
        })
        .await?;

        debug!("[RelationCoordinator] {subject} saved {collection}");
        self.events.emit(OrderingEvent::LibraryChanged { subject });
        Ok(savers)
    }

    /// Drop a saved collection from the subject's library. Returns the remaining savers.
    #[instrument(skip(self))]
    pub async fn unsave(
        &self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Vec<SubjectId>, ShelfError> {
        let savers = self.run("unsave", async {
            let mut tx = self.store.begin().await?;
            match RelationSet::has_edge(tx.as_mut(), subject, collection).await? {
                Some(RelationKind::Saved) => {}
                Some(kind) => {
                    return Err(ShelfError::conflict(format!(
                        "subject {subject} holds {kind} on collection {collection}, not saved"
                    )));
                }
                None => return Err(ShelfError::not_found("saved collection", collection)),
            }

            Self::retire_edge(tx.as_mut(), subject, collection).await?;
            let savers = RelationSet::members(tx.as_mut(), collection, RelationKind::Saved).await?;
            tx.commit().await?;
            Ok(savers)
        })
        .await?;

        debug!("[RelationCoordinator] {subject} unsaved {collection}");
        self.events.emit(OrderingEvent::LibraryChanged { subject });
        Ok(savers)
    }

    /// Make `target` a collaborator, replacing a saved edge if there is one. Returns the
    /// collection's collaborators.
    #[instrument(skip(self))]
    pub async fn add_collaborator(
        &self,
        owner: SubjectId,
        target: SubjectId,
        collection: CollectionId,
    ) -> Result<Vec<SubjectId>, ShelfError> {
        let collaborators = self.run("add_collaborator", async {
            let mut tx = self.store.begin().await?;
            require_collection(tx.as_mut(), collection).await?;
            Self::require_owner(tx.as_mut(), owner, collection).await?;
            if !tx.subject_exists(target).await? {
                return Err(ShelfError::not_found("subject", target));
            }
            if target == owner {
                return Err(ShelfError::conflict(format!(
                    "subject {target} already owns collection {collection}"
                )));
            }
            match RelationSet::has_edge(tx.as_mut(), target, collection).await? {
                Some(RelationKind::Collaborator) => {
                    return Err(ShelfError::conflict(format!(
                        "subject {target} already collaborates on collection {collection}"
                    )));
                }
                Some(RelationKind::Owned) => {
                    return Err(ShelfError::invariant(format!(
                        "subject {target} holds an owned edge on {collection} but is not its owner"
                    )));
                }
                Some(RelationKind::Saved) => {
                    Self::retire_edge(tx.as_mut(), target, collection).await?;
                    debug!("[RelationCoordinator] retired saved edge of {target} on {collection}");
                }
                None => {}
            }

            RelationSet::set_edge(tx.as_mut(), target, collection, RelationKind::Collaborator)
                .await?;
            LibraryLedger::insert_at_head(tx.as_mut(), target, collection).await?;
            let collaborators =
                RelationSet::members(tx.as_mut(), collection, RelationKind::Collaborator).await?;
            tx.commit().await?;
            Ok(collaborators)
        })
        .await?;

        info!("[RelationCoordinator] {owner} added {target} as collaborator on {collection}");
        self.events.emit(OrderingEvent::LibraryChanged { subject: target });
        Ok(collaborators)
    }

    #[instrument(skip(self))]
    pub async fn remove_collaborator(
        &self,
        owner: SubjectId,
        target: SubjectId,
        collection: CollectionId,
    ) -> Result<Vec<SubjectId>, ShelfError> {
        let collaborators = self.run("remove_collaborator", async {
            let mut tx = self.store.begin().await?;
            require_collection(tx.as_mut(), collection).await?;
            Self::require_owner(tx.as_mut(), owner, collection).await?;
            if RelationSet::has_edge(tx.as_mut(), target, collection).await?
                != Some(RelationKind::Collaborator)
            {
                return Err(ShelfError::not_found("collaborator", target));
            }

            Self::retire_edge(tx.as_mut(), target, collection).await?;
            let collaborators =
                RelationSet::members(tx.as_mut(), collection, RelationKind::Collaborator).await?;
            tx.commit().await?;
            Ok(collaborators)
        })
        .await?;

        info!("[RelationCoordinator] {owner} removed collaborator {target} from {collection}");
        self.events.emit(OrderingEvent::LibraryChanged { subject: target });
        Ok(collaborators)
    }

    /// A collaborator walks away from a shared collection.
    #[instrument(skip(self))]
    pub async fn leave(
        &self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Vec<SubjectId>, ShelfError> {
        let collaborators = self.run("leave", async {
            let mut tx = self.store.begin().await?;
            match RelationSet::has_edge(tx.as_mut(), subject, collection).await? {
                Some(RelationKind::Collaborator) => {}
                Some(kind) => {
                    return Err(ShelfError::forbidden(format!(
                        "only collaborators can leave; subject {subject} holds {kind} on {collection}"
                    )));
                }
                None => return Err(ShelfError::not_found("collaboration", collection)),
            }

            Self::retire_edge(tx.as_mut(), subject, collection).await?;
            let collaborators =
                RelationSet::members(tx.as_mut(), collection, RelationKind::Collaborator).await?;
            tx.commit().await?;
            Ok(collaborators)
        })
        .await?;

        debug!("[RelationCoordinator] {subject} left {collection}");
        self.events.emit(OrderingEvent::LibraryChanged { subject });
        Ok(collaborators)
    }

    /// Delete a collection and compact the library of every subject related to it.
    ///
    /// Non-owners are processed one transaction each. The owner goes last, together with
    /// the removal of the collection's items and record, so a run that fails halfway can be
    /// retried by the owner: compaction of already processed subjects is a no-op.
    #[instrument(skip(self))]
    pub async fn delete_collection(
        &self,
        owner: SubjectId,
        collection: CollectionId,
    ) -> Result<(), ShelfError> {
        let affected = self.run("delete_collection", async {
            let members = {
                let mut tx = self.store.begin().await?;
                require_collection(tx.as_mut(), collection).await?;
                Self::require_owner(tx.as_mut(), owner, collection).await?;
                RelationSet::edges_for_collection(tx.as_mut(), collection).await?
            };
            debug!(
                "[RelationCoordinator] deleting {collection}, {} related subjects",
                members.len()
            );

            let mut affected = 0;
            for edge in members.iter().filter(|edge| edge.subject != owner) {
                let mut tx = self.store.begin().await?;
                Self::retire_edge(tx.as_mut(), edge.subject, collection).await?;
                tx.commit().await?;
                self.events.emit(OrderingEvent::LibraryChanged {
                    subject: edge.subject,
                });
                affected += 1;
            }

            let mut tx = self.store.begin().await?;
            let mut late = Vec::new();
            // Edges created after the enumeration above are retired here.
            for edge in RelationSet::edges_for_collection(tx.as_mut(), collection).await? {
                if edge.subject != owner {
                    Self::retire_edge(tx.as_mut(), edge.subject, collection).await?;
                    late.push(edge.subject);
                }
            }
            Self::retire_edge(tx.as_mut(), owner, collection).await?;
            tx.delete_collection(collection).await?;
            tx.commit().await?;
            late.push(owner);
            affected += late.len();
            self.events.emit_all(
                late.into_iter()
                    .map(|subject| OrderingEvent::LibraryChanged { subject }),
            );
            Ok(affected)
        })
        .await?;

        info!("[RelationCoordinator] {owner} deleted {collection}, compacted {affected} libraries");
        Ok(())
    }

    /// The subject's library sorted by position.
    pub async fn library(&self, subject: SubjectId) -> Result<Vec<LibraryEntry>, ShelfError> {
        self.run("library", async {
            let mut tx = self.store.begin().await?;
            let entries = LibraryLedger::snapshot(tx.as_mut(), subject).await?;
            debug!(
                "[RelationCoordinator] library of {subject}: {:?}",
                LibraryLedger::kind_counts(&entries)
            );
            Ok(entries)
        })
        .await
    }

    /// Rearrange the subject's library into the given order.
    #[instrument(skip(self, ordered), fields(len = ordered.len()))]
    pub async fn reorder_library(
        &self,
        subject: SubjectId,
        ordered: &[CollectionId],
    ) -> Result<Vec<LibraryEntry>, ShelfError> {
        let entries = self.run("reorder_library", async {
            let mut tx = self.store.begin().await?;
            let entries = LibraryLedger::reorder(tx.as_mut(), subject, ordered).await?;
            tx.commit().await?;
            Ok(entries)
        })
        .await?;

        self.events.emit(OrderingEvent::LibraryChanged { subject });
        Ok(entries)
    }

    async fn run<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T, ShelfError>>,
    ) -> Result<T, ShelfError> {
        bounded("RelationCoordinator", operation, self.operation_timeout, work).await
    }

    async fn require_owner(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<(), ShelfError> {
        match RelationSet::has_edge(tx, subject, collection).await? {
            Some(RelationKind::Owned) => Ok(()),
            _ => Err(ShelfError::forbidden(format!(
                "subject {subject} does not own collection {collection}"
            ))),
        }
    }

    /// Clear the pair's edge and compact the subject's library behind it.
    async fn retire_edge(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<(), ShelfError> {
        RelationSet::clear_edge(tx, subject, collection).await?;
        LibraryLedger::remove_and_compact(tx, subject, collection).await?;
        Ok(())
    }
}
