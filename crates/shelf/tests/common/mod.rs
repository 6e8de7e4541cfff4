#![allow(dead_code)]

use anyhow::Result;
use shelf::Shelf;
use shelf::config::ShelfConfig;
use shelf::storage::{PositionStore, StoreTransaction};
use shelf::testing::{RecordingRenderer, StaticCatalog, assert_dense};
use shelf_api::{CollectionId, ItemEntry, LibraryEntry, NewCollection, SubjectId};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

/// A running shelf plus whatever must outlive it (the database directory).
pub struct Harness {
    pub shelf: Shelf,
    pub renderer: Arc<RecordingRenderer>,
    _dir: Option<TempDir>,
}

impl Harness {
    pub async fn new(backend: Backend) -> Result<Self> {
        let mut config = ShelfConfig::default();
        config.thumbnail.enabled = false;
        Self::with_config(backend, config, RecordingRenderer::new()).await
    }

    pub async fn with_config(
        backend: Backend,
        mut config: ShelfConfig,
        renderer: RecordingRenderer,
    ) -> Result<Self> {
        let dir = match backend {
            Backend::Memory => None,
            Backend::Sqlite => {
                let dir = tempfile::tempdir()?;
                config.database.path = Some(dir.path().join("shelf.db"));
                Some(dir)
            }
        };
        let renderer = Arc::new(renderer);
        let shelf = Shelf::open(
            &config,
            Arc::new(StaticCatalog::permissive()),
            renderer.clone(),
        )
        .await?;
        Ok(Self {
            shelf,
            renderer,
            _dir: dir,
        })
    }

    pub async fn subject(&self) -> Result<SubjectId> {
        let subject = SubjectId::new();
        self.shelf.relations.register_subject(subject).await?;
        Ok(subject)
    }

    pub async fn create(&self, owner: SubjectId, name: &str, public: bool) -> Result<CollectionId> {
        let request = if public {
            NewCollection::public(name)
        } else {
            NewCollection::private(name)
        };
        Ok(self
            .shelf
            .relations
            .create_collection(owner, request)
            .await?
            .id)
    }

    pub async fn library(&self, subject: SubjectId) -> Result<Vec<LibraryEntry>> {
        let entries = self.shelf.relations.library(subject).await?;
        assert_dense(entries.iter().map(|entry| entry.position));
        Ok(entries)
    }

    pub async fn library_ids(&self, subject: SubjectId) -> Result<Vec<CollectionId>> {
        Ok(self
            .library(subject)
            .await?
            .into_iter()
            .map(|entry| entry.collection)
            .collect())
    }

    pub async fn items(&self, collection: CollectionId) -> Result<Vec<ItemEntry>> {
        let mut tx = self.shelf.store().begin().await?;
        Ok(tx.item_entries(collection).await?)
    }

    pub async fn item_keys(&self, collection: CollectionId) -> Result<Vec<String>> {
        Ok(self
            .items(collection)
            .await?
            .into_iter()
            .map(|item| item.key.as_str().to_string())
            .collect())
    }
}
