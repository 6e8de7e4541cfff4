//! Dense per-subject ordering over every collection a subject relates to.
//!
//! For each subject the stored positions are exactly `0..n`, where `n` is the number of the
//! subject's relation edges. New entries enter at the head; removals close the gap they
//! leave behind.

use shelf_api::{CollectionId, LibraryEntry, Position, RelationKind, ShelfError, SubjectId};
use std::collections::HashSet;
use tracing::debug;

use crate::storage::{PositionSpan, Shift, StoreTransaction};

pub struct LibraryLedger;

impl LibraryLedger {
    /// Push every existing entry down one slot and place `collection` at position 0.
    pub async fn insert_at_head(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<(), ShelfError> {
        if tx.library_position(subject, collection).await?.is_some() {
            return Err(ShelfError::invariant(format!(
                "subject {subject} already has a library entry for {collection}"
            )));
        }
        tx.shift_library(subject, PositionSpan::all(), Shift::Up)
            .await?;
        tx.insert_library_entry(subject, collection, Position::HEAD)
            .await?;
        debug!("[LibraryLedger] {subject}: inserted {collection} at head");
        Ok(())
    }

    /// Delete the entry for `collection` and decrement every later position.
    ///
    /// Returns the position the entry held, or `None` if the subject had no entry. Running
    /// it again after success is a no-op, which keeps collection-deletion fan-out
    /// retryable.
    pub async fn remove_and_compact(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>, ShelfError> {
        let Some(removed) = tx.delete_library_entry(subject, collection).await? else {
            debug!("[LibraryLedger] {subject}: no entry for {collection}, nothing to compact");
            return Ok(None);
        };
        tx.shift_library(subject, PositionSpan::above(removed), Shift::Down)
            .await?;
        debug!("[LibraryLedger] {subject}: removed {collection} from {removed}");
        Ok(Some(removed))
    }

    pub async fn snapshot(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
    ) -> Result<Vec<LibraryEntry>, ShelfError> {
        Ok(tx.library_entries(subject).await?)
    }

    /// Replace the subject's ordering with `ordered`.
    ///
    /// `ordered` must name exactly the collections currently in the library, each once.
    pub async fn reorder(
        tx: &mut dyn StoreTransaction,
        subject: SubjectId,
        ordered: &[CollectionId],
    ) -> Result<Vec<LibraryEntry>, ShelfError> {
        let current = tx.library_entries(subject).await?;
        let current_ids: HashSet<CollectionId> =
            current.iter().map(|entry| entry.collection).collect();
        ensure_same_set(&current_ids, ordered, "library")?;

        let positions = ordered
            .iter()
            .enumerate()
            .map(|(index, collection)| Ok((*collection, Position::from_index(index)?)))
            .collect::<Result<Vec<_>, ShelfError>>()?;
        tx.set_library_positions(subject, &positions).await?;
        Ok(tx.library_entries(subject).await?)
    }

    /// Number of library entries of each kind, for logging.
    pub fn kind_counts(entries: &[LibraryEntry]) -> [(RelationKind, usize); 3] {
        RelationKind::ALL.map(|kind| {
            (
                kind,
                entries.iter().filter(|entry| entry.kind == kind).count(),
            )
        })
    }
}

/// Reject `ordered` unless it is a permutation of `current`.
pub(crate) fn ensure_same_set<T>(
    current: &HashSet<T>,
    ordered: &[T],
    scope: &str,
) -> Result<(), ShelfError>
where
    T: std::hash::Hash + Eq + std::fmt::Display,
{
    if ordered.len() != current.len() {
        return Err(ShelfError::invalid_order(format!(
            "{scope} has {} entries but the new order lists {}",
            current.len(),
            ordered.len()
        )));
    }
    let mut seen = HashSet::with_capacity(ordered.len());
    for id in ordered {
        if !current.contains(id) {
            return Err(ShelfError::invalid_order(format!(
                "{id} is not part of the {scope}"
            )));
        }
        if !seen.insert(id) {
            return Err(ShelfError::invalid_order(format!(
                "{id} appears more than once in the new {scope} order"
            )));
        }
    }
    Ok(())
}
