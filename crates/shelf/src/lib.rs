//! Ordering core for personal libraries and shared collections.
//!
//! Two ledgers are kept consistent with the relation edges between subjects and
//! collections: a dense per-subject library ordering and a per-collection item ordering.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod di;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod ordering;
pub mod relations;
pub mod storage;
pub mod testing;
pub mod thumbnail;

pub use catalog::CatalogLookup;
pub use config::ShelfConfig;
pub use coordinator::RelationCoordinator;
pub use di::Shelf;
pub use events::EventBus;
pub use ordering::ItemOrderingService;
pub use thumbnail::{ThumbnailRenderer, ThumbnailWorker};
