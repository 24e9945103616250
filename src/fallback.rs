use std::sync::Arc;

use fieldx::fxstruct;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::cache::CacheManager;
use crate::config::BackfillMode;
use crate::context::OpContext;
use crate::error::CacheError;
use crate::retry::with_retry;
use crate::retry::RetryPolicies;
use crate::traits::CacheStore;
use crate::traits::PrimaryStore;
use crate::types::Document;
use crate::types::Locator;

/// Read path that survives an unhealthy cache.
///
/// The cache is tried first. A miss, a cache store failure, or an entry that cannot be decoded sends the read to the
/// primary store, after which the cache is repopulated according to the [`BackfillMode`]. Backfill problems are
/// logged and never reach the caller.
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`FallbackReader`].", "", "See [`FallbackReader::builder()`] method."),
        method_doc("Implement builder pattern for [`FallbackReader`]."),
    )
)]
pub struct FallbackReader<CS, PS>
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

    /// With the cache disabled reads go straight to the primary store.
    #[fieldx(get(copy), default(true))]
    cache_enabled: bool,

    #[fieldx(get(copy), default(BackfillMode::Sync))]
    backfill_mode: BackfillMode,
}

impl<CS, PS> FallbackReader<CS, PS>
where
    CS: CacheStore,
    PS: PrimaryStore,
{
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn get_document_with_fallback(
        &self,
        id: &str,
        locator: &Locator,
        ctx: &OpContext,
    ) -> Result<Document, CacheError> {
        if id.is_empty() {
            return Err(CacheError::validation("empty document identifier"));
        }

        let cache_failure = if self.cache_enabled() {
            match self.read_cache(id, ctx).await {
                Ok(document) => return Ok(document),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => err.to_string(),
            }
        }
        else {
            "cache disabled".to_string()
        };

        let document = match self.read_primary(id, locator, ctx).await {
            Ok(document) => document,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                return Err(CacheError::ReadFailed {
                    id:     id.to_string(),
                    cache:  cache_failure,
                    source: Box::new(err),
                })
            }
        };

        if self.cache_enabled() {
            self.backfill(&document, locator, ctx).await;
        }
        Ok(document)
    }

    async fn read_cache(&self, id: &str, ctx: &OpContext) -> Result<Document, CacheError> {
        let entry = self.cache().get(id, ctx).await.inspect_err(|err| {
            if !err.is_not_found() && !err.is_cancelled() {
                warn!(id, error = %err, "cache read failed, falling back to primary store");
            }
        })?;

        self.cache().converter().from_entry(&entry).inspect_err(|err| {
            warn!(id, error = %err, "undecodable cache entry, falling back to primary store");
        })
    }

    async fn read_primary(&self, id: &str, locator: &Locator, ctx: &OpContext) -> Result<Document, CacheError> {
        let primary = self.primary();
        let body = with_retry(&self.primary_retry(), ctx, "primary get", || {
            ctx.run(primary.get_object(locator))
        })
        .await?;

        let document: Document = serde_json::from_slice(&body)?;
        if document.id != id {
            return Err(CacheError::validation(format!(
                "object '{locator}' holds document '{}', expected '{id}'",
                document.id
            )));
        }
        Ok(document)
    }

    async fn backfill(&self, document: &Document, locator: &Locator, ctx: &OpContext) {
        match self.backfill_mode() {
            BackfillMode::Off => (),
            BackfillMode::Sync => {
                if let Err(err) = self.cache().put_with_locator(document, locator, ctx).await {
                    warn!(id = %document.id, error = %err, "cache backfill failed");
                }
                else {
                    debug!(id = %document.id, "cache backfilled");
                }
            }
            BackfillMode::Async => {
                let cache = Arc::clone(self.cache());
                let document = document.clone();
                let locator = locator.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = cache.put_with_locator(&document, &locator, &ctx).await {
                        warn!(id = %document.id, error = %err, "cache backfill failed");
                    }
                });
            }
        }
    }
}
