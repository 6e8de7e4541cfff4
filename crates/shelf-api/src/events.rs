use serde::{Deserialize, Serialize};

use crate::{CollectionId, SubjectId};

/// Side-effect notification published after an ordering mutation commits.
///
/// Consumers (thumbnail regeneration, list re-render) subscribe to these; the core never
/// waits for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderingEvent {
    /// Items of a collection were inserted, removed, moved or reordered.
    ItemSetChanged { collection: CollectionId },
    /// A subject's library gained, lost or reordered an entry.
    LibraryChanged { subject: SubjectId },
}

impl OrderingEvent {
    pub fn collection(&self) -> Option<CollectionId> {
        match self {
            OrderingEvent::ItemSetChanged { collection } => Some(*collection),
            OrderingEvent::LibraryChanged { .. } => None,
        }
    }

    pub fn subject(&self) -> Option<SubjectId> {
        match self {
            OrderingEvent::LibraryChanged { subject } => Some(*subject),
            OrderingEvent::ItemSetChanged { .. } => None,
        }
    }
}
