use async_trait::async_trait;
use shelf_api::{
    Collection, CollectionId, ItemEntry, ItemKey, LibraryEntry, Position, RelationEdge,
    RelationKind, SubjectId,
};

use crate::storage::types::{PositionSpan, Result, Shift};

/// Entry point to a storage engine holding relations and both position ledgers.
///
/// Every read and write happens through a [`StoreTransaction`] obtained from [`begin`].
/// Implementations must isolate concurrent transactions well enough that two transactions
/// touching the same subject's library (or the same collection's items) never both observe
/// the pre-mutation state.
///
/// [`begin`]: PositionStore::begin
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Short name used in logs.
    fn backend_name(&self) -> &'static str;
}

/// A unit of work against a [`PositionStore`].
///
/// Dropping a transaction without calling [`commit`](StoreTransaction::commit) discards all
/// of its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    // ===== Subjects =====

    async fn register_subject(&mut self, subject: SubjectId) -> Result<()>;

    async fn subject_exists(&mut self, subject: SubjectId) -> Result<bool>;

    // ===== Collections =====

    async fn insert_collection(&mut self, collection: &Collection) -> Result<()>;

    async fn get_collection(&mut self, id: CollectionId) -> Result<Option<Collection>>;

    /// Delete the collection record and every item entry it holds.
    async fn delete_collection(&mut self, id: CollectionId) -> Result<bool>;

    async fn set_thumbnail(&mut self, id: CollectionId, url: Option<&str>) -> Result<bool>;

    // ===== Relations =====

    async fn relation_kind(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<RelationKind>>;

    /// Fails with `DuplicateRelation` if the pair already has an edge of any kind.
    async fn insert_relation(&mut self, edge: &RelationEdge) -> Result<()>;

    async fn delete_relation(&mut self, subject: SubjectId, collection: CollectionId)
    -> Result<bool>;

    async fn relations_for_collection(
        &mut self,
        collection: CollectionId,
    ) -> Result<Vec<RelationEdge>>;

    // ===== Library positions =====

    /// The subject's library sorted by ascending position.
    async fn library_entries(&mut self, subject: SubjectId) -> Result<Vec<LibraryEntry>>;

    async fn library_position(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>>;

    async fn insert_library_entry(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
        position: Position,
    ) -> Result<()>;

    async fn delete_library_entry(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>>;

    /// Move every entry of `subject` inside `span` one slot in the given direction.
    async fn shift_library(
        &mut self,
        subject: SubjectId,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()>;

    /// Assign all given positions as one batch; intermediate collisions are not observable.
    async fn set_library_positions(
        &mut self,
        subject: SubjectId,
        positions: &[(CollectionId, Position)],
    ) -> Result<()>;

    // ===== Item positions =====

    /// The collection's items sorted by ascending position.
    async fn item_entries(&mut self, collection: CollectionId) -> Result<Vec<ItemEntry>>;

    async fn item_position(
        &mut self,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<Option<Position>>;

    async fn max_item_position(&mut self, collection: CollectionId) -> Result<Option<Position>>;

    async fn item_count(&mut self, collection: CollectionId) -> Result<usize>;

    /// Fails with `DuplicateItem` if the key is present, `PositionCollision` if the slot is.
    async fn insert_item(&mut self, item: &ItemEntry) -> Result<()>;

    async fn delete_item(&mut self, collection: CollectionId, key: &ItemKey)
    -> Result<Option<Position>>;

    async fn shift_items(
        &mut self,
        collection: CollectionId,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()>;

    async fn set_item_positions(
        &mut self,
        collection: CollectionId,
        positions: &[(ItemKey, Position)],
    ) -> Result<()>;

    // ===== Lifecycle =====

    async fn commit(self: Box<Self>) -> Result<()>;
}
