use std::sync::Arc;

use tracing::debug;

use crate::cache::CacheManager;
use crate::config::EngineConfig;
use crate::converter::ItemConverter;
use crate::error::CacheError;
use crate::fallback::FallbackReader;
use crate::notification::ChangeNotificationHandler;
use crate::rate_limiter::RateLimiter;
use crate::traits::CacheStore;
use crate::traits::PrimaryStore;
use crate::write_through::WriteThroughHandler;

fn configuration_error(err: impl std::fmt::Display) -> CacheError {
    CacheError::Configuration(err.to_string())
}

/// All components wired from one [`EngineConfig`] over one pair of stores.
///
/// The handlers share a single [`CacheManager`] and therefore a single [`RateLimiter`]: the configured request rate
/// is a budget for the whole engine, not per handler.
///
/// ```ignore
/// let engine = Engine::new(EngineConfig::default(), cache_store, primary_store)?;
/// let ctx = OpContext::new();
///
/// let locator = engine.writer().write_document(&document, &ctx).await?;
/// let same = engine.reader().get_document_with_fallback(&document.id, &locator, &ctx).await?;
/// ```
pub struct Engine<CS, PS>
where
    CS: CacheStore,
    PS: PrimaryStore,
{
    config:        EngineConfig,
    rate_limiter:  Arc<RateLimiter>,
    cache:         Arc<CacheManager<CS>>,
    primary:       Arc<PS>,
    writer:        WriteThroughHandler<CS, PS>,
    notifications: ChangeNotificationHandler<CS, PS>,
    reader:        FallbackReader<CS, PS>,
}

impl<CS, PS> Engine<CS, PS>
where
    CS: CacheStore,
    PS: PrimaryStore,
{
    pub fn new(
        config: EngineConfig,
        cache_store: impl Into<Arc<CS>>,
        primary_store: impl Into<Arc<PS>>,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let rate_limiter = Arc::new(RateLimiter::new(config.requests_per_second)?);
        let primary = primary_store.into();
        let cache = Arc::new(
            CacheManager::builder()
                .store(cache_store)
                .rate_limiter(Arc::clone(&rate_limiter))
                .converter(ItemConverter::new(config.ttl_days, config.layout()))
                .retry(config.cache_retry)
                .page_size(config.page_size)
                .build()
                .map_err(configuration_error)?,
        );

        let writer = WriteThroughHandler::builder()
            .cache(Arc::clone(&cache))
            .primary(Arc::clone(&primary))
            .primary_retry(config.primary_retry)
            .cache_enabled(config.cache_enabled)
            .compensation_timeout(config.compensation_timeout())
            .build()
            .map_err(configuration_error)?;

        let notifications = ChangeNotificationHandler::builder()
            .cache(Arc::clone(&cache))
            .primary(Arc::clone(&primary))
            .primary_retry(config.primary_retry)
            .cache_enabled(config.cache_enabled)
            .build()
            .map_err(configuration_error)?;

        let reader = FallbackReader::builder()
            .cache(Arc::clone(&cache))
            .primary(Arc::clone(&primary))
            .primary_retry(config.primary_retry)
            .cache_enabled(config.cache_enabled)
            .backfill_mode(config.backfill)
            .build()
            .map_err(configuration_error)?;

        debug!(
            rps = config.requests_per_second,
            ttl_days = config.ttl_days,
            cache_enabled = config.cache_enabled,
            "engine ready"
        );

        Ok(Self {
            config,
            rate_limiter,
            cache,
            primary,
            writer,
            notifications,
            reader,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Direct access to cache operations, queries in particular.
    pub fn cache(&self) -> &Arc<CacheManager<CS>> {
        &self.cache
    }

    pub fn primary(&self) -> &Arc<PS> {
        &self.primary
    }

    pub fn writer(&self) -> &WriteThroughHandler<CS, PS> {
        &self.writer
    }

    pub fn notifications(&self) -> &ChangeNotificationHandler<CS, PS> {
        &self.notifications
    }

    pub fn reader(&self) -> &FallbackReader<CS, PS> {
        &self.reader
    }
}
