//! In-memory implementation of [`PositionStore`].
//!
//! Used by unit tests, by the property-based suites as the system under test, and as the
//! default store when no database path is configured. A transaction holds the store's lock
//! for its whole lifetime, so transactions are fully serialized. Writes land directly in the
//! shared state and are recorded in an undo log. Dropping the transaction without committing
//! replays the log backwards, so an uncommitted transaction leaves no trace.
//!
//! The undo log snapshots a subject's library or a collection's items the first time a
//! transaction writes to them, and single records (subjects, collections, edges) on every
//! write. A transaction therefore costs the size of what it touches, not of the store.

use async_trait::async_trait;
use shelf_api::{
    Collection, CollectionId, ItemEntry, ItemKey, LibraryEntry, Position, RelationEdge,
    RelationKind, SubjectId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::storage::backend::{PositionStore, StoreTransaction};
use crate::storage::types::{PositionSpan, Result, Shift, StorageError};

type Library = HashMap<CollectionId, Position>;
type Items = HashMap<ItemKey, ItemEntry>;

#[derive(Debug, Default)]
struct MemoryState {
    subjects: HashSet<SubjectId>,
    collections: HashMap<CollectionId, Collection>,
    relations: HashMap<(SubjectId, CollectionId), RelationKind>,
    library: HashMap<SubjectId, Library>,
    items: HashMap<CollectionId, Items>,
}

/// HashMap-backed store with serializable transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            state,
            undo: Vec::new(),
            saved_libraries: HashSet::new(),
            saved_items: HashSet::new(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Prior value of one piece of state, restored on rollback.
#[derive(Debug)]
enum Undo {
    Subject(SubjectId),
    Collection(CollectionId, Option<Collection>),
    Relation((SubjectId, CollectionId), Option<RelationKind>),
    Library(SubjectId, Option<Library>),
    Items(CollectionId, Option<Items>),
}

struct MemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
    saved_libraries: HashSet<SubjectId>,
    saved_items: HashSet<CollectionId>,
}

fn restore<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, V>, key: K, prior: Option<V>) {
    match prior {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        trace!("[MemoryStore] rolling back {} writes", self.undo.len());
        let state = &mut *self.state;
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Subject(subject) => {
                    state.subjects.remove(&subject);
                }
                Undo::Collection(id, prior) => restore(&mut state.collections, id, prior),
                Undo::Relation(key, prior) => restore(&mut state.relations, key, prior),
                Undo::Library(subject, prior) => restore(&mut state.library, subject, prior),
                Undo::Items(collection, prior) => restore(&mut state.items, collection, prior),
            }
        }
    }
}

fn collision(scope: &str, detail: String) -> StorageError {
    StorageError::PositionCollision {
        scope: scope.to_string(),
        detail,
    }
}

fn shift_slots<'a>(
    slots: impl Iterator<Item = &'a mut Position>,
    span: PositionSpan,
    shift: Shift,
) -> Result<()> {
    for slot in slots {
        if span.contains(*slot) {
            *slot = shift.apply(*slot)?;
        }
    }
    Ok(())
}

fn ensure_unique(positions: impl Iterator<Item = Position>, scope: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for position in positions {
        if !seen.insert(position) {
            return Err(collision(scope, format!("two entries at position {position}")));
        }
    }
    Ok(())
}

impl MemoryTransaction {
    fn library_mut(&mut self, subject: SubjectId) -> &mut Library {
        if self.saved_libraries.insert(subject) {
            let prior = self.state.library.get(&subject).cloned();
            self.undo.push(Undo::Library(subject, prior));
        }
        self.state.library.entry(subject).or_default()
    }

    fn save_items(&mut self, collection: CollectionId) {
        if self.saved_items.insert(collection) {
            let prior = self.state.items.get(&collection).cloned();
            self.undo.push(Undo::Items(collection, prior));
        }
    }

    fn items_mut(&mut self, collection: CollectionId) -> &mut Items {
        self.save_items(collection);
        self.state.items.entry(collection).or_default()
    }

    fn save_collection(&mut self, id: CollectionId) {
        let prior = self.state.collections.get(&id).cloned();
        self.undo.push(Undo::Collection(id, prior));
    }

    fn save_relation(&mut self, key: (SubjectId, CollectionId)) {
        let prior = self.state.relations.get(&key).copied();
        self.undo.push(Undo::Relation(key, prior));
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn register_subject(&mut self, subject: SubjectId) -> Result<()> {
        if self.state.subjects.insert(subject) {
            self.undo.push(Undo::Subject(subject));
        }
        Ok(())
    }

    async fn subject_exists(&mut self, subject: SubjectId) -> Result<bool> {
        Ok(self.state.subjects.contains(&subject))
    }

    async fn insert_collection(&mut self, collection: &Collection) -> Result<()> {
        self.save_collection(collection.id);
        self.state
            .collections
            .insert(collection.id, collection.clone());
        Ok(())
    }

    async fn get_collection(&mut self, id: CollectionId) -> Result<Option<Collection>> {
        Ok(self.state.collections.get(&id).cloned())
    }

    async fn delete_collection(&mut self, id: CollectionId) -> Result<bool> {
        if !self.state.collections.contains_key(&id) {
            return Ok(false);
        }
        self.save_collection(id);
        self.save_items(id);
        self.state.items.remove(&id);
        Ok(self.state.collections.remove(&id).is_some())
    }

    async fn set_thumbnail(&mut self, id: CollectionId, url: Option<&str>) -> Result<bool> {
        if !self.state.collections.contains_key(&id) {
            return Ok(false);
        }
        self.save_collection(id);
        if let Some(collection) = self.state.collections.get_mut(&id) {
            collection.thumbnail_url = url.map(str::to_string);
        }
        Ok(true)
    }

    async fn relation_kind(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<RelationKind>> {
        Ok(self.state.relations.get(&(subject, collection)).copied())
    }

    async fn insert_relation(&mut self, edge: &RelationEdge) -> Result<()> {
        let key = (edge.subject, edge.collection);
        if self.state.relations.contains_key(&key) {
            return Err(StorageError::DuplicateRelation {
                subject: edge.subject.to_string(),
                collection: edge.collection.to_string(),
            });
        }
        self.save_relation(key);
        self.state.relations.insert(key, edge.kind);
        Ok(())
    }

    async fn delete_relation(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<bool> {
        let key = (subject, collection);
        if !self.state.relations.contains_key(&key) {
            return Ok(false);
        }
        self.save_relation(key);
        Ok(self.state.relations.remove(&key).is_some())
    }

    async fn relations_for_collection(
        &mut self,
        collection: CollectionId,
    ) -> Result<Vec<RelationEdge>> {
        let mut edges: Vec<RelationEdge> = self
            .state
            .relations
            .iter()
            .filter(|((_, c), _)| *c == collection)
            .map(|((subject, collection), kind)| RelationEdge {
                subject: *subject,
                collection: *collection,
                kind: *kind,
            })
            .collect();
        edges.sort_by_key(|edge| edge.subject);
        Ok(edges)
    }

    async fn library_entries(&mut self, subject: SubjectId) -> Result<Vec<LibraryEntry>> {
        let state = &*self.state;
        let Some(library) = state.library.get(&subject) else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::with_capacity(library.len());
        for (collection, position) in library {
            let kind = state
                .relations
                .get(&(subject, *collection))
                .copied()
                .ok_or_else(|| {
                    collision(
                        "library",
                        format!("entry for {collection} has no relation edge"),
                    )
                })?;
            entries.push(LibraryEntry {
                subject,
                collection: *collection,
                kind,
                position: *position,
            });
        }
        entries.sort_by_key(|entry| entry.position);
        Ok(entries)
    }

    async fn library_position(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>> {
        Ok(self
            .state
            .library
            .get(&subject)
            .and_then(|library| library.get(&collection))
            .copied())
    }

    async fn insert_library_entry(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
        position: Position,
    ) -> Result<()> {
        let library = self.library_mut(subject);
        if library.contains_key(&collection) {
            return Err(collision(
                "library",
                format!("subject {subject} already has an entry for {collection}"),
            ));
        }
        if library.values().any(|p| *p == position) {
            return Err(collision(
                "library",
                format!("subject {subject} already has an entry at {position}"),
            ));
        }
        library.insert(collection, position);
        Ok(())
    }

    async fn delete_library_entry(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>> {
        let present = self
            .state
            .library
            .get(&subject)
            .is_some_and(|library| library.contains_key(&collection));
        if !present {
            return Ok(None);
        }
        Ok(self.library_mut(subject).remove(&collection))
    }

    async fn shift_library(
        &mut self,
        subject: SubjectId,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()> {
        let library = self.library_mut(subject);
        shift_slots(library.values_mut(), span, shift)?;
        ensure_unique(library.values().copied(), "library")
    }

    async fn set_library_positions(
        &mut self,
        subject: SubjectId,
        positions: &[(CollectionId, Position)],
    ) -> Result<()> {
        let library = self.library_mut(subject);
        for (collection, position) in positions {
            let slot = library
                .get_mut(collection)
                .ok_or_else(|| StorageError::NotFound {
                    entity: "library entry".to_string(),
                    id: collection.to_string(),
                })?;
            *slot = *position;
        }
        ensure_unique(library.values().copied(), "library")
    }

    async fn item_entries(&mut self, collection: CollectionId) -> Result<Vec<ItemEntry>> {
        let mut entries: Vec<ItemEntry> = self
            .state
            .items
            .get(&collection)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|entry| entry.position);
        Ok(entries)
    }

    async fn item_position(
        &mut self,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<Option<Position>> {
        Ok(self
            .state
            .items
            .get(&collection)
            .and_then(|items| items.get(key))
            .map(|item| item.position))
    }

    async fn max_item_position(&mut self, collection: CollectionId) -> Result<Option<Position>> {
        Ok(self
            .state
            .items
            .get(&collection)
            .and_then(|items| items.values().map(|item| item.position).max()))
    }

    async fn item_count(&mut self, collection: CollectionId) -> Result<usize> {
        Ok(self
            .state
            .items
            .get(&collection)
            .map(HashMap::len)
            .unwrap_or(0))
    }

    async fn insert_item(&mut self, item: &ItemEntry) -> Result<()> {
        let items = self.items_mut(item.collection);
        if items.contains_key(&item.key) {
            return Err(StorageError::DuplicateItem {
                collection: item.collection.to_string(),
                key: item.key.to_string(),
            });
        }
        if items.values().any(|existing| existing.position == item.position) {
            return Err(collision(
                "items",
                format!(
                    "collection {} already has an item at {}",
                    item.collection, item.position
                ),
            ));
        }
        items.insert(item.key.clone(), item.clone());
        Ok(())
    }

    async fn delete_item(
        &mut self,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<Option<Position>> {
        let present = self
            .state
            .items
            .get(&collection)
            .is_some_and(|items| items.contains_key(key));
        if !present {
            return Ok(None);
        }
        Ok(self
            .items_mut(collection)
            .remove(key)
            .map(|item| item.position))
    }

    async fn shift_items(
        &mut self,
        collection: CollectionId,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()> {
        let items = self.items_mut(collection);
        shift_slots(items.values_mut().map(|item| &mut item.position), span, shift)?;
        ensure_unique(items.values().map(|item| item.position), "items")
    }

    async fn set_item_positions(
        &mut self,
        collection: CollectionId,
        positions: &[(ItemKey, Position)],
    ) -> Result<()> {
        let items = self.items_mut(collection);
        for (key, position) in positions {
            let item = items.get_mut(key).ok_or_else(|| StorageError::NotFound {
                entity: "item".to_string(),
                id: key.to_string(),
            })?;
            item.position = *position;
        }
        ensure_unique(items.values().map(|item| item.position), "items")
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.undo.clear();
        Ok(())
    }
}
