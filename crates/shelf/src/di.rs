//! Dependency wiring for the position subsystem.
//!
//! Builds the store selected by the configuration and hands the same store and event bus
//! to the coordinator, the item service and the thumbnail worker.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::catalog::CatalogLookup;
use crate::config::ShelfConfig;
use crate::coordinator::RelationCoordinator;
use crate::events::EventBus;
use crate::ordering::ItemOrderingService;
use crate::storage::{MemoryStore, PositionStore, SqliteStore};
use crate::thumbnail::{ThumbnailRenderer, ThumbnailWorker};

pub struct Shelf {
    pub relations: RelationCoordinator,
    pub items: ItemOrderingService,
    pub events: EventBus,
    store: Arc<dyn PositionStore>,
    worker: Option<ThumbnailWorker>,
}

impl Shelf {
    /// Open the configured store and start the thumbnail worker if enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(
        config: &ShelfConfig,
        catalog: Arc<dyn CatalogLookup>,
        renderer: Arc<dyn ThumbnailRenderer>,
    ) -> Result<Self> {
        let store = open_store(config).await?;
        let events = EventBus::new(config.events.capacity);

        let worker = config.thumbnail.enabled.then(|| {
            ThumbnailWorker::spawn(
                store.clone(),
                renderer,
                &events,
                config.thumbnail.clone(),
            )
        });

        let timeout = config.operation_timeout();
        Ok(Self {
            relations: RelationCoordinator::new(store.clone(), events.clone(), timeout),
            items: ItemOrderingService::new(store.clone(), events.clone(), catalog, timeout),
            events,
            store,
            worker,
        })
    }

    pub fn store(&self) -> Arc<dyn PositionStore> {
        self.store.clone()
    }

    /// Stop the thumbnail worker. Renders in flight are abandoned.
    pub async fn shutdown(self) {
        if let Some(worker) = self.worker {
            worker.shutdown().await;
        }
    }
}

/// Open the SQLite database at `database.path`, or an in-memory store when unset.
pub async fn open_store(config: &ShelfConfig) -> Result<Arc<dyn PositionStore>> {
    let store: Arc<dyn PositionStore> = match &config.database.path {
        Some(path) => Arc::new(
            SqliteStore::open(path, &config.database)
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    info!("[Shelf] using {} store", store.backend_name());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingRenderer, StaticCatalog};
    use shelf_api::{NewCollection, SubjectId};

    #[tokio::test]
    async fn default_configuration_runs_in_memory() {
        let shelf = Shelf::open(
            &ShelfConfig::default(),
            Arc::new(StaticCatalog::permissive()),
            Arc::new(RecordingRenderer::new()),
        )
        .await
        .unwrap();

        assert_eq!(shelf.store().backend_name(), "memory");
        let owner = SubjectId::new();
        shelf
            .relations
            .create_collection(owner, NewCollection::public("first"))
            .await
            .unwrap();
        assert_eq!(shelf.relations.library(owner).await.unwrap().len(), 1);
        shelf.shutdown().await;
    }

    #[tokio::test]
    async fn database_path_selects_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ShelfConfig::default();
        config.database.path = Some(dir.path().join("shelf.db"));
        config.thumbnail.enabled = false;

        let shelf = Shelf::open(
            &config,
            Arc::new(StaticCatalog::permissive()),
            Arc::new(RecordingRenderer::new()),
        )
        .await
        .unwrap();

        assert_eq!(shelf.store().backend_name(), "sqlite");
    }
}
