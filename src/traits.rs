use async_trait::async_trait;

use crate::error::CacheError;
use crate::types::CacheEntry;
use crate::types::IndexCursor;
use crate::types::IndexQuery;
use crate::types::Locator;
use crate::types::Page;

/// The low-latency, indexed, TTL-governed store that mirrors the primary store.
///
/// Implementations report failures through the store-level kinds of [`CacheError`] (`Throttling`, `Network`,
/// `Unavailable`) tagged with [`StoreKind::Cache`](crate::error::StoreKind::Cache). Retrying and rate limiting are
/// the caller's job.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Upsert the entry together with its three index projections.
    async fn put_entry(&self, entry: CacheEntry) -> Result<(), CacheError>;

    async fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Remove the entry and its projections. Removing a missing entry succeeds.
    async fn delete_entry(&self, id: &str) -> Result<(), CacheError>;

    /// One page of `query`, ascending by `(created_at, id)`, strictly after `after` when given.
    async fn query_index(
        &self,
        query: &IndexQuery,
        after: Option<&IndexCursor>,
        limit: usize,
    ) -> Result<Page, CacheError>;
}

/// The durable object store; the source of truth.
#[async_trait]
pub trait PrimaryStore: Send + Sync + 'static {
    async fn put_object(&self, locator: &Locator, body: Vec<u8>) -> Result<(), CacheError>;

    /// Fails with `NotFound` when there is no object at `locator`.
    async fn get_object(&self, locator: &Locator) -> Result<Vec<u8>, CacheError>;

    async fn delete_object(&self, locator: &Locator) -> Result<(), CacheError>;
}
