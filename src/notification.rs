use std::sync::Arc;

use fieldx::fxstruct;
use futures::Stream;
use futures::StreamExt;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::cache::CacheManager;
use crate::context::OpContext;
use crate::error::CacheError;
use crate::retry::with_retry;
use crate::retry::RetryPolicies;
use crate::traits::CacheStore;
use crate::traits::PrimaryStore;
use crate::types::ChangeNotification;
use crate::types::Document;
use crate::types::EventKind;
use crate::types::Locator;

/// What handling a notification did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The entry for this id now mirrors the primary store object.
    Upserted(String),
    /// The entry for this id is gone.
    Removed(String),
    /// The cache is disabled; nothing to do.
    Ignored,
}

/// Re-synchronizes the cache after primary store mutations that bypassed the write-through path.
///
/// Notifications may arrive duplicated and out of order. Every action is keyed by document id and idempotent, and an
/// upsert always re-reads the current object, so replaying a notification converges on the primary store's state.
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc(
            "Builder object of [`ChangeNotificationHandler`].",
            "",
            "See [`ChangeNotificationHandler::builder()`] method."
        ),
        method_doc("Implement builder pattern for [`ChangeNotificationHandler`]."),
    )
)]
pub struct ChangeNotificationHandler<CS, PS>
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

    #[fieldx(get(copy), default(true))]
    cache_enabled: bool,
}

impl<CS, PS> ChangeNotificationHandler<CS, PS>
where
    CS: CacheStore,
    PS: PrimaryStore,
{
    fn document_id(&self, locator: &Locator) -> Result<String, CacheError> {
        self.cache().converter().layout().document_id(locator).inspect_err(|err| {
            warn!(%locator, error = %err, "dropping notification for a foreign object");
        })
    }

    /// Mirrors the object at `locator` into the cache. The entry is keyed by the id the locator implies, the same
    /// id a later delete notification resolves. Malformed objects, and objects whose payload id disagrees with their
    /// key, are reported as `Validation` errors and must not be redelivered.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn handle_upsert_notification(
        &self,
        locator: &Locator,
        ctx: &OpContext,
    ) -> Result<NotificationOutcome, CacheError> {
        if !self.cache_enabled() {
            return Ok(NotificationOutcome::Ignored);
        }

        let id = self.document_id(locator)?;
        let primary = self.primary();
        let fetched = with_retry(&self.primary_retry(), ctx, "primary get", || {
            ctx.run(primary.get_object(locator))
        })
        .await;

        let body = match fetched {
            Ok(body) => body,
            Err(err) if err.is_not_found() => {
                // Overtaken by a delete.
                debug!(%locator, id, "object is gone, dropping its cache entry");
                self.cache().delete(&id, ctx).await?;
                return Ok(NotificationOutcome::Removed(id));
            }
            Err(err) => return Err(err),
        };

        let document: Document = serde_json::from_slice(&body).map_err(|err| {
            warn!(%locator, error = %err, "dropping notification for a malformed object");
            CacheError::validation(format!("object '{locator}' is not a document: {err}"))
        })?;
        if document.id != id {
            warn!(%locator, payload_id = %document.id, "dropping notification for a misplaced document");
            return Err(CacheError::validation(format!(
                "object '{locator}' holds document '{}', expected '{id}'",
                document.id
            )));
        }

        let entry = self
            .cache()
            .put_with_locator(&document, locator, ctx)
            .await
            .inspect_err(|err| {
                if err.is_validation() {
                    warn!(%locator, error = %err, "dropping notification for an invalid document");
                }
            })?;

        Ok(NotificationOutcome::Upserted(entry.id))
    }

    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn handle_delete_notification(
        &self,
        locator: &Locator,
        ctx: &OpContext,
    ) -> Result<NotificationOutcome, CacheError> {
        if !self.cache_enabled() {
            return Ok(NotificationOutcome::Ignored);
        }

        let id = self.document_id(locator)?;
        self.cache().delete(&id, ctx).await?;
        Ok(NotificationOutcome::Removed(id))
    }

    pub async fn handle(
        &self,
        notification: &ChangeNotification,
        ctx: &OpContext,
    ) -> Result<NotificationOutcome, CacheError> {
        match notification.kind {
            EventKind::Upsert => self.handle_upsert_notification(&notification.locator, ctx).await,
            EventKind::Delete => self.handle_delete_notification(&notification.locator, ctx).await,
        }
    }

    /// Handles every notification of the stream, at most `concurrency` at a time. One failing notification does not
    /// affect the others; results are reported in completion order.
    pub async fn drain<S>(
        &self,
        notifications: S,
        concurrency: usize,
        ctx: &OpContext,
    ) -> Vec<(ChangeNotification, Result<NotificationOutcome, CacheError>)>
    where
        S: Stream<Item = ChangeNotification>,
    {
        let results = notifications
            .map(move |notification| async move {
                let outcome = self.handle(&notification, ctx).await;
                (notification, outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let failed = results.iter().filter(|(_, outcome)| outcome.is_err()).count();
        if failed > 0 {
            warn!(total = results.len(), failed, "some change notifications were not applied");
        }
        else {
            debug!(total = results.len(), "change notifications applied");
        }
        results
    }
}
