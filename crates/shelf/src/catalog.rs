//! Seam to the external media catalog.

use async_trait::async_trait;
use shelf_api::{ItemKey, ItemMetadata, MediaType, ShelfError};

/// Looks up display metadata for an item about to be added to a collection.
///
/// Called before the ledger transaction opens, so a slow catalog never holds locks.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// `Ok(None)` means the catalog does not know the key.
    async fn enrich_item(
        &self,
        key: &ItemKey,
        media_type: MediaType,
        locale: &str,
    ) -> anyhow::Result<Option<ItemMetadata>>;
}

/// Run the lookup and fold both failure shapes into `EnrichmentFailed`.
pub(crate) async fn enrich(
    catalog: &dyn CatalogLookup,
    key: &ItemKey,
    media_type: MediaType,
    locale: &str,
) -> Result<ItemMetadata, ShelfError> {
    match catalog.enrich_item(key, media_type, locale).await {
        Ok(Some(metadata)) => Ok(metadata),
        Ok(None) => Err(ShelfError::EnrichmentFailed {
            key: key.to_string(),
            reason: format!("no {media_type} with this key in the catalog"),
        }),
        Err(e) => Err(ShelfError::EnrichmentFailed {
            key: key.to_string(),
            reason: format!("{e:#}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticCatalog;

    #[tokio::test]
    async fn unknown_key_is_an_enrichment_failure() {
        let catalog = StaticCatalog::new();
        let key = ItemKey::parse("movie:404").unwrap();

        let err = enrich(&catalog, &key, MediaType::Movie, "en-US")
            .await
            .unwrap_err();

        assert!(matches!(err, ShelfError::EnrichmentFailed { ref key, .. } if key == "movie:404"));
    }

    #[tokio::test]
    async fn catalog_errors_keep_their_context() {
        let catalog = StaticCatalog::new().failing("upstream returned 503");
        let key = ItemKey::parse("movie:603").unwrap();

        let err = enrich(&catalog, &key, MediaType::Movie, "en-US")
            .await
            .unwrap_err();

        match err {
            ShelfError::EnrichmentFailed { reason, .. } => assert!(reason.contains("503")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
