//! Per-collection ordering of member items.
//!
//! Positions are unique within a collection. They are dense after the first insertion into
//! an empty collection and after a full reorder; a single removal leaves a gap that the next
//! full reorder closes. Listings always sort ascending, so gaps never show.

use shelf_api::{CollectionId, ItemEntry, ItemKey, Position, ShelfError};
use std::collections::HashSet;
use tracing::debug;

use crate::ledger::library::ensure_same_set;
use crate::storage::{PositionSpan, Shift, StoreTransaction};

pub struct ItemLedger;

impl ItemLedger {
    /// Place a new item after the current last one (or at 0 in an empty collection).
    pub async fn append_at_tail(
        tx: &mut dyn StoreTransaction,
        mut item: ItemEntry,
    ) -> Result<ItemEntry, ShelfError> {
        let collection = item.collection;
        item.position = match tx.max_item_position(collection).await? {
            Some(max) => max.next(),
            None => Position::HEAD,
        };
        tx.insert_item(&item).await?;
        debug!(
            "[ItemLedger] {collection}: appended {} at {}",
            item.key, item.position
        );
        Ok(item)
    }

    /// Move the item to position 0; items that were before it shift up by one.
    ///
    /// The target leaves the ledger while the others shift, so its old slot is free when
    /// its neighbour moves into it.
    pub async fn move_to_head(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<(), ShelfError> {
        let mut item = Self::entry_of(tx, collection, key).await?;
        let current = item.position;
        if current == Position::HEAD {
            return Ok(());
        }
        tx.delete_item(collection, key).await?;
        tx.shift_items(collection, PositionSpan::below(current), Shift::Up)
            .await?;
        item.position = Position::HEAD;
        tx.insert_item(&item).await?;
        debug!("[ItemLedger] {collection}: moved {key} from {current} to head");
        Ok(())
    }

    /// Move the item to the dense tail slot `count - 1`, `count` including the moved item.
    ///
    /// Items above the old slot shift down by one. If earlier removals left gaps, the
    /// shift alone cannot free `count - 1`, so the collection is renumbered instead with the
    /// moved item last.
    pub async fn move_to_tail(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<(), ShelfError> {
        let entries = tx.item_entries(collection).await?;
        let mut item = entries
            .iter()
            .find(|entry| &entry.key == key)
            .cloned()
            .ok_or_else(|| ShelfError::not_found("item", key))?;
        let current = item.position;
        let tail = Position::from_index(entries.len() - 1)?;

        let dense = entries
            .iter()
            .enumerate()
            .all(|(index, entry)| entry.position.index() == index);

        if dense {
            if current == tail {
                return Ok(());
            }
            tx.delete_item(collection, key).await?;
            tx.shift_items(collection, PositionSpan::above(current), Shift::Down)
                .await?;
            item.position = tail;
            tx.insert_item(&item).await?;
        } else {
            let mut order: Vec<ItemKey> = entries
                .into_iter()
                .map(|entry| entry.key)
                .filter(|k| k != key)
                .collect();
            order.push(key.clone());
            Self::assign_dense(tx, collection, order).await?;
        }
        debug!("[ItemLedger] {collection}: moved {key} from {current} to tail {tail}");
        Ok(())
    }

    /// Replace the collection's ordering with `ordered` as one batch.
    ///
    /// `ordered` must list exactly the current item keys, each once.
    pub async fn full_reorder(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        ordered: &[ItemKey],
    ) -> Result<(), ShelfError> {
        let current: HashSet<ItemKey> = tx
            .item_entries(collection)
            .await?
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        ensure_same_set(&current, ordered, "collection")?;
        Self::assign_dense(tx, collection, ordered.to_vec()).await?;
        debug!(
            "[ItemLedger] {collection}: reordered {} items",
            ordered.len()
        );
        Ok(())
    }

    /// Delete the item without compacting the remaining positions.
    pub async fn remove(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<Position, ShelfError> {
        let removed = tx
            .delete_item(collection, key)
            .await?
            .ok_or_else(|| ShelfError::not_found("item", key))?;
        debug!("[ItemLedger] {collection}: removed {key} from {removed}");
        Ok(removed)
    }

    pub async fn snapshot(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
    ) -> Result<Vec<ItemEntry>, ShelfError> {
        Ok(tx.item_entries(collection).await?)
    }

    async fn entry_of(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<ItemEntry, ShelfError> {
        tx.item_entries(collection)
            .await?
            .into_iter()
            .find(|entry| &entry.key == key)
            .ok_or_else(|| ShelfError::not_found("item", key))
    }

    async fn assign_dense(
        tx: &mut dyn StoreTransaction,
        collection: CollectionId,
        order: Vec<ItemKey>,
    ) -> Result<(), ShelfError> {
        let positions = order
            .into_iter()
            .enumerate()
            .map(|(index, key)| Ok((key, Position::from_index(index)?)))
            .collect::<Result<Vec<_>, ShelfError>>()?;
        tx.set_item_positions(collection, &positions).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PositionStore};
    use crate::testing::{assert_dense, item_entry};

    fn key(raw: &str) -> ItemKey {
        ItemKey::parse(raw).unwrap()
    }

    async fn seeded(tx: &mut dyn StoreTransaction, keys: &[&str]) -> CollectionId {
        let collection = CollectionId::new();
        for raw in keys {
            ItemLedger::append_at_tail(tx, item_entry(collection, raw))
                .await
                .unwrap();
        }
        collection
    }

    async fn layout(tx: &mut dyn StoreTransaction, collection: CollectionId) -> Vec<(String, u32)> {
        ItemLedger::snapshot(tx, collection)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.key.as_str().to_string(), entry.position.value()))
            .collect()
    }

    fn expect(pairs: &[(&str, u32)]) -> Vec<(String, u32)> {
        pairs.iter().map(|(k, p)| (k.to_string(), *p)).collect()
    }

    #[tokio::test]
    async fn append_to_empty_collection_starts_at_zero() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["x", "y"]).await;
        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("x", 0), ("y", 1)])
        );
    }

    #[tokio::test]
    async fn append_after_a_gap_uses_max_plus_one() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["x", "y", "z"]).await;
        ItemLedger::remove(tx.as_mut(), collection, &key("y"))
            .await
            .unwrap();
        ItemLedger::append_at_tail(tx.as_mut(), item_entry(collection, "w"))
            .await
            .unwrap();
        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("x", 0), ("z", 2), ("w", 3)])
        );
    }

    #[tokio::test]
    async fn move_to_tail_keeps_the_sequence_dense() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["x", "y", "z"]).await;

        ItemLedger::move_to_tail(tx.as_mut(), collection, &key("x"))
            .await
            .unwrap();

        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("y", 0), ("z", 1), ("x", 2)])
        );
    }

    #[tokio::test]
    async fn move_to_head_shifts_only_items_above_the_target() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["a", "b", "c", "d"]).await;

        ItemLedger::move_to_head(tx.as_mut(), collection, &key("c"))
            .await
            .unwrap();

        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("c", 0), ("a", 1), ("b", 2), ("d", 3)])
        );
    }

    #[tokio::test]
    async fn move_to_tail_after_a_removal_does_not_collide() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["a", "b", "c", "d"]).await;
        ItemLedger::remove(tx.as_mut(), collection, &key("b"))
            .await
            .unwrap();

        ItemLedger::move_to_tail(tx.as_mut(), collection, &key("a"))
            .await
            .unwrap();

        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("c", 0), ("d", 1), ("a", 2)])
        );
    }

    #[tokio::test]
    async fn removal_leaves_a_gap_until_the_next_reorder() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["a", "b", "c"]).await;

        let removed = ItemLedger::remove(tx.as_mut(), collection, &key("b"))
            .await
            .unwrap();
        assert_eq!(removed, Position::new(1));
        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("a", 0), ("c", 2)])
        );

        ItemLedger::full_reorder(tx.as_mut(), collection, &[key("c"), key("a")])
            .await
            .unwrap();
        let entries = ItemLedger::snapshot(tx.as_mut(), collection).await.unwrap();
        assert_dense(entries.iter().map(|entry| entry.position));
        assert_eq!(
            layout(tx.as_mut(), collection).await,
            expect(&[("c", 0), ("a", 1)])
        );
    }

    #[tokio::test]
    async fn full_reorder_with_wrong_cardinality_changes_nothing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["a", "b", "c"]).await;
        let before = ItemLedger::snapshot(tx.as_mut(), collection).await.unwrap();

        let err = ItemLedger::full_reorder(tx.as_mut(), collection, &[key("b"), key("a")])
            .await
            .unwrap_err();

        assert!(matches!(err, ShelfError::InvalidOrder { .. }));
        assert_eq!(
            ItemLedger::snapshot(tx.as_mut(), collection).await.unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn moving_a_missing_item_is_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let collection = seeded(tx.as_mut(), &["a"]).await;

        for result in [
            ItemLedger::move_to_head(tx.as_mut(), collection, &key("zz")).await,
            ItemLedger::move_to_tail(tx.as_mut(), collection, &key("zz")).await,
            ItemLedger::remove(tx.as_mut(), collection, &key("zz"))
                .await
                .map(|_| ()),
        ] {
            assert!(matches!(result, Err(ShelfError::NotFound { .. })));
        }
    }
}
