//! Item operations on a collection, exposed to the request layer.
//!
//! Every mutation returns the collection as it stands after the commit and announces the
//! change with `ItemSetChanged`, which drives thumbnail regeneration.

use chrono::Utc;
use shelf_api::{
    Collection, CollectionId, CollectionView, ItemEntry, ItemKey, MediaType, OrderDirective,
    OrderingEvent, Position, RelationKind, ShelfError, SubjectId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::catalog::{CatalogLookup, enrich};
use crate::coordinator::{bounded, require_collection};
use crate::events::EventBus;
use crate::ledger::ItemLedger;
use crate::relations::RelationSet;
use crate::storage::{PositionStore, StoreTransaction};

pub struct ItemOrderingService {
    store: Arc<dyn PositionStore>,
    events: EventBus,
    catalog: Arc<dyn CatalogLookup>,
    operation_timeout: Duration,
}

impl ItemOrderingService {
    pub fn new(
        store: Arc<dyn PositionStore>,
        events: EventBus,
        catalog: Arc<dyn CatalogLookup>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            catalog,
            operation_timeout,
        }
    }

    /// Append an item to the end of the collection.
    ///
    /// Metadata comes from the catalog before the ledger transaction opens; the guards are
    /// checked both before the lookup and again inside the transaction.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn add_item(
        &self,
        subject: SubjectId,
        collection: CollectionId,
        key: ItemKey,
        media_type: MediaType,
        locale: &str,
    ) -> Result<CollectionView, ShelfError> {
        let view = self
            .run("add_item", async {
                {
                    let mut tx = self.store.begin().await?;
                    Self::require_editor(tx.as_mut(), subject, collection).await?;
                    Self::require_absent(tx.as_mut(), collection, &key).await?;
                }

                let metadata = enrich(self.catalog.as_ref(), &key, media_type, locale).await?;

                let mut tx = self.store.begin().await?;
                Self::require_editor(tx.as_mut(), subject, collection).await?;
                Self::require_absent(tx.as_mut(), collection, &key).await?;
                let entry = ItemEntry {
                    collection,
                    key: key.clone(),
                    metadata,
                    position: Position::HEAD,
                    added_by: subject,
                    added_at: Utc::now(),
                };
                ItemLedger::append_at_tail(tx.as_mut(), entry).await?;
                let view = Self::build_view(tx.as_mut(), subject, collection).await?;
                tx.commit().await?;
                Ok(view)
            })
            .await?;

        debug!("[ItemOrderingService] {subject} added {key} to {collection}");
        self.events
            .emit(OrderingEvent::ItemSetChanged { collection });
        Ok(view)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn move_item(
        &self,
        subject: SubjectId,
        collection: CollectionId,
        key: &ItemKey,
        directive: OrderDirective,
    ) -> Result<CollectionView, ShelfError> {
        let view = self
            .run("move_item", async {
                let mut tx = self.store.begin().await?;
                Self::require_editor(tx.as_mut(), subject, collection).await?;
                match directive {
                    OrderDirective::First => {
                        ItemLedger::move_to_head(tx.as_mut(), collection, key).await?
                    }
                    OrderDirective::Last => {
                        ItemLedger::move_to_tail(tx.as_mut(), collection, key).await?
                    }
                }
                let view = Self::build_view(tx.as_mut(), subject, collection).await?;
                tx.commit().await?;
                Ok(view)
            })
            .await?;

        self.events
            .emit(OrderingEvent::ItemSetChanged { collection });
        Ok(view)
    }

    /// Replace the item order with `keys`, which must name every item exactly once.
    #[instrument(skip(self, keys), fields(len = keys.len()))]
    pub async fn reorder_items(
        &self,
        subject: SubjectId,
        collection: CollectionId,
        keys: &[ItemKey],
    ) -> Result<CollectionView, ShelfError> {
        let view = self
            .run("reorder_items", async {
                let mut tx = self.store.begin().await?;
                Self::require_editor(tx.as_mut(), subject, collection).await?;
                ItemLedger::full_reorder(tx.as_mut(), collection, keys).await?;
                let view = Self::build_view(tx.as_mut(), subject, collection).await?;
                tx.commit().await?;
                Ok(view)
            })
            .await?;

        self.events
            .emit(OrderingEvent::ItemSetChanged { collection });
        Ok(view)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove_item(
        &self,
        subject: SubjectId,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<CollectionView, ShelfError> {
        let view = self
            .run("remove_item", async {
                let mut tx = self.store.begin().await?;
                Self::require_editor(tx.as_mut(), subject, collection).await?;
                ItemLedger::remove(tx.as_mut(), collection, key).await?;
                let view = Self::build_view(tx.as_mut(), subject, collection).await?;
                tx.commit().await?;
                Ok(view)
            })
            .await?;

        self.events
            .emit(OrderingEvent::ItemSetChanged { collection });
        Ok(view)
    }

    /// The collection as `viewer` sees it. Private collections are visible to related
    /// subjects only.
    pub async fn collection_view(
        &self,
        viewer: SubjectId,
        collection: CollectionId,
    ) -> Result<CollectionView, ShelfError> {
        self.run("collection_view", async {
            let mut tx = self.store.begin().await?;
            let view = Self::build_view(tx.as_mut(), viewer, collection).await?;
            if !view.collection.is_public && view.viewer_relation.is_none() {
                return Err(ShelfError::forbidden(format!(
                    "collection {collection} is private"
                )));
            }
            Ok(view)
        })
        .await
    }

    async fn run<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T, ShelfError>>,
    ) -> Result<T, ShelfError> {
        bounded("ItemOrderingService", operation, self.operation_timeout, work).await
    }

    async fn require_editor(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Collection, ShelfError> {
        let record = require_collection(tx, collection).await?;
        match RelationSet::has_edge(tx, subject, collection).await? {
            Some(kind) if kind.can_edit_items() => Ok(record),
            _ => Err(ShelfError::forbidden(format!(
                "subject {subject} cannot edit the items of collection {collection}"
            ))),
        }
    }

    async fn require_absent(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<(), ShelfError> {
        if tx.item_position(collection, key).await?.is_some() {
            return Err(ShelfError::conflict(format!(
                "{key} is already in collection {collection}"
            )));
        }
        Ok(())
    }

    async fn build_view(
        tx: &mut dyn StoreTransaction,
        viewer: SubjectId,
        collection: CollectionId,
    ) -> Result<CollectionView, ShelfError> {
        let record = require_collection(tx, collection).await?;
        let items = ItemLedger::snapshot(tx, collection).await?;
        let viewer_relation = RelationSet::has_edge(tx, viewer, collection).await?;
        let collaborators =
            RelationSet::members(tx, collection, RelationKind::Collaborator).await?;
        Ok(CollectionView {
            collection: record,
            items,
            viewer_relation,
            collaborators,
        })
    }
}
