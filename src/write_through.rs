use std::sync::Arc;
use std::time::Duration;

use fieldx::fxstruct;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;

use crate::cache::CacheManager;
use crate::context::OpContext;
use crate::error::CacheError;
use crate::retry::with_retry;
use crate::retry::RetryPolicies;
use crate::traits::CacheStore;
use crate::traits::PrimaryStore;
use crate::types::Document;
use crate::types::Locator;

/// Writes a document to the cache first, then to the primary store.
///
/// If the primary write fails after its retries, the cache entry written in the first step is deleted again and the
/// primary store's error is returned. The rollback runs under its own context so that a caller giving up does not
/// also abandon the rollback.
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`WriteThroughHandler`].", "", "See [`WriteThroughHandler::builder()`] method."),
        method_doc("Implement builder pattern for [`WriteThroughHandler`]."),
    )
)]
pub struct WriteThroughHandler<CS, PS>
where
    CS: CacheStore,
    PS: PrimaryStore,
{
    #[fieldx(get, builder(required, into))]
    cache: Arc<CacheManager<CS>>,

    #[fieldx(get, builder(required, into))]
    primary: Arc<PS>,

    #[fieldx(get(copy), default(RetryPolicies::default()))]
    primary_retry: RetryPolicies,

    /// With the cache disabled only the primary store is written.
    #[fieldx(get(copy), default(true))]
    cache_enabled: bool,

    #[fieldx(get(copy), default(Duration::from_secs(30)))]
    compensation_timeout: Duration,
}

impl<CS, PS> WriteThroughHandler<CS, PS>
where
    CS: CacheStore,
    PS: PrimaryStore,
{
    /// Returns the locator the document was stored at. Repeating the call with the same document is harmless.
    #[instrument(level = "debug", skip(self, document, ctx), fields(id = %document.id))]
    pub async fn write_document(&self, document: &Document, ctx: &OpContext) -> Result<Locator, CacheError> {
        let converter = self.cache().converter();
        converter.validate(document)?;
        let locator = converter.locator_for(document);
        let body = serde_json::to_vec(document)?;

        if ctx.is_dry_run() {
            info!(%locator, cache = self.cache_enabled(), "dry run: would write document");
            return Ok(locator);
        }

        if self.cache_enabled() {
            self.cache().put_with_locator(document, &locator, ctx).await?;
        }

        let primary = self.primary();
        let written = with_retry(&self.primary_retry(), ctx, "primary put", || {
            ctx.run(primary.put_object(&locator, body.clone()))
        })
        .await;

        if let Err(err) = written {
            if self.cache_enabled() {
                self.compensate(&document.id, ctx).await;
            }
            return Err(err);
        }

        debug!(%locator, "document written");
        Ok(locator)
    }

    async fn compensate(&self, id: &str, ctx: &OpContext) {
        let rollback = ctx.detached(self.compensation_timeout());
        match self.cache().delete(id, &rollback).await {
            Ok(()) => debug!(id, "cache entry rolled back after failed primary write"),
            Err(err) => error!(
                id,
                error = %err,
                "cannot roll back cache entry; it is inconsistent with the primary store until it expires"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCacheStore;
    use crate::backend::MemoryObjectStore;
    use crate::rate_limiter::RateLimiter;
    use crate::types::DocumentType;

    fn handler(cache_enabled: bool) -> WriteThroughHandler<MemoryCacheStore, MemoryObjectStore> {
        let cache = CacheManager::builder()
            .store(MemoryCacheStore::builder().build().unwrap())
            .rate_limiter(Arc::new(RateLimiter::new(1000).unwrap()))
            .build()
            .unwrap();
        WriteThroughHandler::builder()
            .cache(Arc::new(cache))
            .primary(MemoryObjectStore::new())
            .cache_enabled(cache_enabled)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn writes_both_stores() {
        let handler = handler(true);
        let doc = Document::new("CHG-1", DocumentType::Change, vec!["hts".to_string()], 1000);

        let locator = handler.write_document(&doc, &OpContext::new()).await.unwrap();
        assert_eq!(locator, Locator::new("documents", "change/CHG-1.json"));

        let stored: Document = serde_json::from_slice(&handler.primary().object(&locator).unwrap()).unwrap();
        assert_eq!(stored, doc);
        let entry = handler.cache().get("CHG-1", &OpContext::new()).await.unwrap();
        assert_eq!(entry.storage_locator, locator);
    }

    #[tokio::test]
    async fn invalid_documents_touch_nothing() {
        let handler = handler(true);
        let doc = Document::new("CHG-1", DocumentType::Change, vec![], 1000);

        let err = handler.write_document(&doc, &OpContext::new()).await.unwrap_err();
        assert!(err.is_validation());
        assert!(handler.primary().is_empty());
        assert!(handler.cache().store().is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_writes_primary_only() {
        let handler = handler(false);
        let doc = Document::new("ANN-1", DocumentType::Announcement, vec!["cds".to_string()], 5);

        let locator = handler.write_document(&doc, &OpContext::new()).await.unwrap();
        assert!(handler.primary().contains(&locator));
        assert!(handler.cache().store().is_empty());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let handler = handler(true);
        let doc = Document::new("CHG-1", DocumentType::Change, vec!["hts".to_string()], 1000);

        handler.write_document(&doc, &OpContext::new().dry_run()).await.unwrap();
        assert!(handler.primary().is_empty());
        assert!(handler.cache().store().is_empty());
    }
}
