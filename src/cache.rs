use std::future::Future;
use std::sync::Arc;

use fieldx::fxstruct;
use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use futures::TryStreamExt;
use tracing::debug;
use tracing::info;
use tracing::instrument;

use crate::context::OpContext;
use crate::converter::ItemConverter;
use crate::error::CacheError;
use crate::error::StoreKind;
use crate::rate_limiter::RateLimiter;
use crate::retry::with_retry;
use crate::retry::RetryPolicies;
use crate::traits::CacheStore;
use crate::types::CacheEntry;
use crate::types::Document;
use crate::types::DocumentType;
use crate::types::Index;
use crate::types::IndexCursor;
use crate::types::IndexQuery;
use crate::types::Locator;
use crate::types::Page;
use crate::types::Timestamp;

/// Lazy sequence of query results, ascending by creation time.
pub type EntryStream<'a> = BoxStream<'a, Result<CacheEntry, CacheError>>;

/// Owner of every cache store operation.
///
/// Each store call first takes a token from the shared [`RateLimiter`], then runs under the context's cancellation
/// and the retry policies. Throttling and network errors are absorbed up to their attempt caps.
///
/// ```ignore
/// let manager = CacheManager::builder()
///     .store(MemoryCacheStore::builder().build()?)
///     .rate_limiter(Arc::new(RateLimiter::new(100)?))
///     .converter(ItemConverter::new(90, KeyLayout::default()))
///     .build()?;
///
/// manager.put(&document, &OpContext::new()).await?;
/// let recent = manager
///     .query_by_time_range(DocumentType::Change, start, end, &OpContext::new())
///     .try_collect::<Vec<_>>()
///     .await?;
/// ```
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`CacheManager`].", "", "See [`CacheManager::builder()`] method."),
        method_doc("Implement builder pattern for [`CacheManager`]."),
    )
)]
pub struct CacheManager<CS>
where
    CS: CacheStore,
{
    #[fieldx(get(clone), builder(required, into))]
    store: Arc<CS>,

    /// Shared with every other consumer of the same cache store.
    #[fieldx(get(clone), builder(required, into))]
    rate_limiter: Arc<RateLimiter>,

    #[fieldx(get, default(ItemConverter::default()))]
    converter: ItemConverter,

    #[fieldx(get(copy), default(RetryPolicies::default()))]
    retry: RetryPolicies,

    /// Entries fetched per query round trip.
    #[fieldx(get(copy), default(100))]
    page_size: usize,
}

impl<CS> CacheManager<CS>
where
    CS: CacheStore,
{
    // Rate-limited, cancellable, retried store call.
    async fn call<T, F, Fut>(&self, operation: &str, ctx: &OpContext, mut f: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let limiter = self.rate_limiter();
        let limiter = &limiter;
        with_retry(&self.retry(), ctx, operation, || {
            let request = f();
            async move {
                limiter.acquire(ctx).await?;
                ctx.run(request).await
            }
        })
        .await
    }

    /// Upserts the document's entry at its canonical locator. Writing the same document again leaves the same state.
    #[instrument(level = "debug", skip(self, document, ctx), fields(id = %document.id))]
    pub async fn put(&self, document: &Document, ctx: &OpContext) -> Result<CacheEntry, CacheError> {
        let entry = self.converter().to_entry(document)?;
        self.put_entry(entry, ctx).await
    }

    /// Upserts the document's entry pointing at `locator`, for objects that live outside the canonical layout.
    #[instrument(level = "debug", skip(self, document, ctx), fields(id = %document.id, %locator))]
    pub async fn put_with_locator(
        &self,
        document: &Document,
        locator: &Locator,
        ctx: &OpContext,
    ) -> Result<CacheEntry, CacheError> {
        let entry = self.converter().to_entry_at(document, locator.clone())?;
        self.put_entry(entry, ctx).await
    }

    async fn put_entry(&self, entry: CacheEntry, ctx: &OpContext) -> Result<CacheEntry, CacheError> {
        if ctx.is_dry_run() {
            info!(id = %entry.id, "dry run: would put cache entry");
            return Ok(entry);
        }

        let store = self.store();
        self.call("cache put", ctx, || store.put_entry(entry.clone())).await?;
        debug!("PUT({})", entry.id);
        Ok(entry)
    }

    /// Point lookup. Never consults the primary store.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn get(&self, id: &str, ctx: &OpContext) -> Result<CacheEntry, CacheError> {
        if id.is_empty() {
            return Err(CacheError::validation("empty document identifier"));
        }

        let store = self.store();
        match self.call("cache get", ctx, || store.get_entry(id)).await? {
            Some(entry) => {
                debug!("GET({id}): hit");
                Ok(entry)
            }
            None => {
                debug!("GET({id}): miss");
                Err(CacheError::not_found(StoreKind::Cache, id))
            }
        }
    }

    /// Removes the entry and its projections. A missing entry is not an error.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn delete(&self, id: &str, ctx: &OpContext) -> Result<(), CacheError> {
        if id.is_empty() {
            return Err(CacheError::validation("empty document identifier"));
        }
        if ctx.is_dry_run() {
            info!(id, "dry run: would delete cache entry");
            return Ok(());
        }

        let store = self.store();
        match self.call("cache delete", ctx, || store.delete_entry(id)).await {
            Err(err) if err.is_not_found() => Ok(()),
            outcome => {
                debug!("DELETE({id})");
                outcome
            }
        }
    }

    /// One page of results strictly after `after`. Feed the returned cursor back in to continue.
    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn query_page(
        &self,
        query: &IndexQuery,
        after: Option<&IndexCursor>,
        ctx: &OpContext,
    ) -> Result<Page, CacheError> {
        query.validate()?;
        let store = self.store();
        let limit = self.page_size();
        self.call("cache query", ctx, || store.query_index(query, after, limit))
            .await
    }

    /// Streams every result of `query`, fetching pages on demand. The stream ends after the last page; issuing the
    /// same query again starts over.
    pub fn query<'a>(&'a self, query: IndexQuery, ctx: &OpContext) -> EntryStream<'a> {
        let ctx = ctx.clone();

        // State: Some(cursor) while pages remain, None once the last page was delivered.
        stream::try_unfold(Some(None::<IndexCursor>), move |state| {
            let query = query.clone();
            let ctx = ctx.clone();
            async move {
                let Some(after) = state
                else {
                    return Ok::<_, CacheError>(None);
                };
                let page = self.query_page(&query, after.as_ref(), &ctx).await?;
                Ok(Some((page.entries, page.next.map(Some))))
            }
        })
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, CacheError>)))
        .try_flatten()
        .boxed()
    }

    pub fn query_by_time_range(
        &self,
        doc_type: DocumentType,
        start: Timestamp,
        end: Timestamp,
        ctx: &OpContext,
    ) -> EntryStream<'_> {
        self.query(IndexQuery::new(Index::TypeTime, doc_type.as_str(), start, end), ctx)
    }

    /// Only the primary (first) customer of a document is indexed.
    pub fn query_by_customer_and_time(
        &self,
        customer: &str,
        start: Timestamp,
        end: Timestamp,
        ctx: &OpContext,
    ) -> EntryStream<'_> {
        self.query(IndexQuery::new(Index::CustomerTime, customer, start, end), ctx)
    }

    pub fn query_by_status_and_time(
        &self,
        status: &str,
        start: Timestamp,
        end: Timestamp,
        ctx: &OpContext,
    ) -> EntryStream<'_> {
        self.query(IndexQuery::new(Index::StatusTime, status, start, end), ctx)
    }
}
