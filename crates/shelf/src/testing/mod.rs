//! Test doubles and assertions shared by unit tests, integration tests and the
//! property-based suites.
//!
//! Key components:
//! - `StaticCatalog`: in-memory `CatalogLookup` with optional failure injection
//! - `RecordingRenderer`: `ThumbnailRenderer` that records every regeneration request
//! - `assert_dense`: the library density check used after every step of the state machine

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use shelf_api::{
    CollectionId, ItemEntry, ItemKey, ItemMetadata, MediaType, OrderingEvent, Position, SubjectId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;

use crate::catalog::CatalogLookup;
use crate::thumbnail::ThumbnailRenderer;

/// Panic unless `positions`, taken in order, are exactly `0, 1, .., n-1`.
pub fn assert_dense(positions: impl IntoIterator<Item = Position>) {
    let positions: Vec<u32> = positions.into_iter().map(Position::value).collect();
    let expected: Vec<u32> = (0..positions.len() as u32).collect();
    assert_eq!(
        positions, expected,
        "positions are not a dense zero-based sequence"
    );
}

pub fn sample_metadata(key: &str, media_type: MediaType) -> ItemMetadata {
    ItemMetadata {
        title: format!("Title of {key}"),
        media_type,
        poster_url: Some(format!("https://img.example/{key}.jpg")),
        release_year: Some(1999),
    }
}

/// An unpositioned movie entry; ledgers assign the position on insert.
pub fn item_entry(collection: CollectionId, key: &str) -> ItemEntry {
    ItemEntry {
        collection,
        key: ItemKey::parse(key).expect("test item keys are non-empty"),
        metadata: sample_metadata(key, MediaType::Movie),
        position: Position::HEAD,
        added_by: SubjectId::new(),
        added_at: Utc::now(),
    }
}

/// Wait up to `wait` for an event matching `predicate`, skipping everything else.
pub async fn wait_for_event<F>(
    receiver: &mut broadcast::Receiver<OrderingEvent>,
    wait: Duration,
    predicate: F,
) -> Result<OrderingEvent>
where
    F: Fn(&OrderingEvent) -> bool,
{
    timeout(wait, async {
        loop {
            match receiver.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(anyhow!("event channel closed: {e}")),
            }
        }
    })
    .await
    .map_err(|_| anyhow!("no matching event within {wait:?}"))?
}

/// Catalog backed by a fixed map.
///
/// In permissive mode any key resolves to generated metadata, which keeps scenario tests
/// free of catalog setup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, ItemMetadata>,
    permissive: bool,
    failure: Option<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    pub fn with_item(mut self, key: &str, metadata: ItemMetadata) -> Self {
        self.entries.insert(key.to_string(), metadata);
        self
    }

    /// Every lookup fails with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn enrich_item(
        &self,
        key: &ItemKey,
        media_type: MediaType,
        _locale: &str,
    ) -> Result<Option<ItemMetadata>> {
        if let Some(reason) = &self.failure {
            return Err(anyhow!("catalog lookup for {key} failed: {reason}"));
        }
        if let Some(metadata) = self.entries.get(key.as_str()) {
            return Ok(Some(metadata.clone()));
        }
        Ok(self
            .permissive
            .then(|| sample_metadata(key.as_str(), media_type)))
    }
}

/// One call to [`RecordingRenderer::regenerate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCall {
    pub collection: CollectionId,
    pub poster_urls: Vec<String>,
}

/// Renderer that records its inputs and answers with a deterministic URL.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    calls: Arc<Mutex<Vec<RenderCall>>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleep before answering, to exercise the render timeout.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().await.clone()
    }

    pub fn url_for(collection: CollectionId, poster_count: usize) -> String {
        format!("https://thumbs.example/{collection}/{poster_count}.png")
    }
}

#[async_trait]
impl ThumbnailRenderer for RecordingRenderer {
    async fn regenerate(
        &self,
        collection: CollectionId,
        poster_urls: Vec<String>,
    ) -> Result<Option<String>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let url = (!poster_urls.is_empty()).then(|| Self::url_for(collection, poster_urls.len()));
        self.calls.lock().await.push(RenderCall {
            collection,
            poster_urls,
        });
        if self.fail {
            return Err(anyhow!("renderer unavailable"));
        }
        Ok(url)
    }
}
