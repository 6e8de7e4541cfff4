//! Background regeneration of collection thumbnails.
//!
//! The worker listens for `ItemSetChanged`, reads the leading poster URLs in a short read
//! transaction, and calls the renderer with no transaction open. Its failures are logged
//! and never reach the operation that triggered them.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use shelf_api::{CollectionId, OrderingEvent};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ThumbnailConfig;
use crate::events::EventBus;
use crate::storage::PositionStore;

/// Produces a composite thumbnail from a collection's leading posters.
#[async_trait]
pub trait ThumbnailRenderer: Send + Sync {
    /// Returns the URL of the new thumbnail, or `None` when there is nothing to render.
    async fn regenerate(
        &self,
        collection: CollectionId,
        poster_urls: Vec<String>,
    ) -> Result<Option<String>>;
}

pub struct ThumbnailWorker {
    handle: JoinHandle<()>,
}

impl ThumbnailWorker {
    pub fn spawn(
        store: Arc<dyn PositionStore>,
        renderer: Arc<dyn ThumbnailRenderer>,
        events: &EventBus,
        config: ThumbnailConfig,
    ) -> Self {
        let receiver = events.subscribe();
        let handle = tokio::spawn(async move {
            info!(
                "[ThumbnailWorker] started, {} posters per thumbnail",
                config.poster_count
            );
            run(store, renderer, receiver, config).await;
            info!("[ThumbnailWorker] event channel closed, stopping");
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn run(
    store: Arc<dyn PositionStore>,
    renderer: Arc<dyn ThumbnailRenderer>,
    mut receiver: broadcast::Receiver<OrderingEvent>,
    config: ThumbnailConfig,
) {
    loop {
        let first = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("[ThumbnailWorker] lagged behind, {skipped} events dropped");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        // Everything already queued is folded into this round, one render per collection.
        let mut pending = Vec::new();
        push_collection(&mut pending, first);
        loop {
            match receiver.try_recv() {
                Ok(event) => push_collection(&mut pending, event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("[ThumbnailWorker] lagged behind, {skipped} events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        for collection in pending {
            if let Err(e) = regenerate(store.as_ref(), renderer.as_ref(), collection, &config).await
            {
                warn!("[ThumbnailWorker] thumbnail for {collection} not updated: {e:#}");
            }
        }
    }
}

fn push_collection(pending: &mut Vec<CollectionId>, event: OrderingEvent) {
    if let Some(collection) = event.collection() {
        if !pending.contains(&collection) {
            pending.push(collection);
        }
    }
}

async fn regenerate(
    store: &dyn PositionStore,
    renderer: &dyn ThumbnailRenderer,
    collection: CollectionId,
    config: &ThumbnailConfig,
) -> Result<()> {
    let posters: Vec<String> = {
        let mut tx = store.begin().await.context("opening read transaction")?;
        if tx.get_collection(collection).await?.is_none() {
            debug!("[ThumbnailWorker] {collection} no longer exists, skipping");
            return Ok(());
        }
        tx.item_entries(collection)
            .await?
            .into_iter()
            .filter_map(|item| item.metadata.poster_url)
            .take(config.poster_count)
            .collect()
    };

    let url = timeout(
        config.render_timeout(),
        renderer.regenerate(collection, posters),
    )
    .await
    .map_err(|_| anyhow!("renderer timed out after {:?}", config.render_timeout()))?
    .context("renderer failed")?;

    let mut tx = store.begin().await?;
    let updated = tx.set_thumbnail(collection, url.as_deref()).await?;
    tx.commit().await?;
    if updated {
        debug!("[ThumbnailWorker] {collection} thumbnail set to {url:?}");
    } else {
        debug!("[ThumbnailWorker] {collection} deleted while rendering");
    }
    Ok(())
}
