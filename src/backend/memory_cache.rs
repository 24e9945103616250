use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fieldx::fxstruct;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use parking_lot::RwLock;
use tracing::debug;
use tracing::instrument;

use crate::error::CacheError;
use crate::traits::CacheStore;
use crate::types::CacheEntry;
use crate::types::Index;
use crate::types::IndexCursor;
use crate::types::IndexQuery;
use crate::types::Page;
use crate::types::Timestamp;

// (partition, created_at, id)
type IndexKey = (String, Timestamp, String);

#[derive(Debug, Default)]
struct IndexSet {
    by_type:     BTreeMap<IndexKey, CacheEntry>,
    by_customer: BTreeMap<IndexKey, CacheEntry>,
    by_status:   BTreeMap<IndexKey, CacheEntry>,
}

impl IndexSet {
    fn key(index: Index, entry: &CacheEntry) -> IndexKey {
        (
            entry.partition_for(index).to_string(),
            entry.created_at,
            entry.id.clone(),
        )
    }

    fn tree(&self, index: Index) -> &BTreeMap<IndexKey, CacheEntry> {
        match index {
            Index::TypeTime => &self.by_type,
            Index::CustomerTime => &self.by_customer,
            Index::StatusTime => &self.by_status,
        }
    }

    fn tree_mut(&mut self, index: Index) -> &mut BTreeMap<IndexKey, CacheEntry> {
        match index {
            Index::TypeTime => &mut self.by_type,
            Index::CustomerTime => &mut self.by_customer,
            Index::StatusTime => &mut self.by_status,
        }
    }

    fn insert(&mut self, entry: &CacheEntry) {
        for index in Index::ALL {
            self.tree_mut(index).insert(Self::key(index, entry), entry.clone());
        }
    }

    fn remove(&mut self, entry: &CacheEntry) {
        for index in Index::ALL {
            self.tree_mut(index).remove(&Self::key(index, entry));
        }
    }

    // Eviction notifications arrive after the fact. A projection is only dropped if it still is the evicted one.
    fn remove_if_current(&mut self, entry: &CacheEntry) {
        for index in Index::ALL {
            let key = Self::key(index, entry);
            if self.tree(index).get(&key) == Some(entry) {
                self.tree_mut(index).remove(&key);
            }
        }
    }

    fn page(&self, query: &IndexQuery, after: Option<&IndexCursor>, limit: usize) -> Page {
        let lower = match after {
            Some(cursor) => Bound::Excluded((query.partition.clone(), cursor.created_at, cursor.id.clone())),
            None => Bound::Included((query.partition.clone(), query.start, String::new())),
        };

        let mut entries = self
            .tree(query.index)
            .range((lower, Bound::Unbounded))
            .take_while(|((partition, created_at, _), _)| *partition == query.partition && *created_at <= query.end)
            .filter(|((_, created_at, _), _)| *created_at >= query.start)
            .take(limit.saturating_add(1))
            .map(|(_, entry)| entry.clone())
            .collect::<Vec<_>>();

        let next = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(CacheEntry::cursor)
        }
        else {
            None
        };

        Page { entries, next }
    }

    fn len(&self, index: Index) -> usize {
        self.tree(index).len()
    }
}

/// Cache store kept in process memory.
///
/// The base table is a [moka](https://crates.io/crates/moka) cache bounded by `max_capacity`; when it evicts an
/// entry the index projections follow. Upserts and deletes run inside moka's per-key compute so that the base entry
/// and its projections change together.
///
/// Like hosted document stores, TTL is enforced by a sweep rather than on read: an entry past its `expires_at` stays
/// visible until [`purge_expired`](Self::purge_expired) (or the sweeper started by
/// [`spawn_ttl_sweeper`](Self::spawn_ttl_sweeper)) removes it.
///
/// ```ignore
/// let store = MemoryCacheStore::builder()
///     .name("documents")
///     .max_capacity(100_000)
///     .build()?;
/// ```
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`MemoryCacheStore`].", "", "See [`MemoryCacheStore::builder()`] method."),
        method_doc("Implement builder pattern for [`MemoryCacheStore`]."),
    )
)]
pub struct MemoryCacheStore {
    /// Store name. Most useful for debugging and logging.
    #[fieldx(get(clone), builder(into), default("cache-store".to_string()))]
    name: String,

    #[fieldx(get(copy), default(1_000_000))]
    max_capacity: u64,

    #[fieldx(private, get(clone), builder(off), default(Arc::new(RwLock::new(IndexSet::default()))))]
    indexes: Arc<RwLock<IndexSet>>,

    #[fieldx(private, lazy, get(clone), builder(off))]
    table: Arc<Cache<String, CacheEntry>>,
}

impl MemoryCacheStore {
    fn build_table(&self) -> Arc<Cache<String, CacheEntry>> {
        let indexes = self.indexes();
        Arc::new(
            Cache::builder()
                .name(&self.name())
                .max_capacity(self.max_capacity())
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .eviction_listener(move |_id, entry: CacheEntry, cause: RemovalCause| {
                    if cause.was_evicted() {
                        indexes.write().remove_if_current(&entry);
                    }
                })
                .build(),
        )
    }

    /// Number of entries in the base table.
    pub fn len(&self) -> usize {
        self.table().iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of projections held by one index.
    pub fn index_len(&self, index: Index) -> usize {
        self.indexes().read().len(index)
    }

    /// Deletes every entry whose `expires_at` is not after `now`. Returns how many were removed.
    pub async fn purge_expired(&self, now: Timestamp) -> usize {
        let expired = self
            .table()
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(id, _)| id.as_ref().clone())
            .collect::<Vec<_>>();

        let indexes = self.indexes();
        let mut purged = 0;
        for id in expired {
            let indexes = indexes.clone();
            let outcome = self
                .table()
                .entry(id)
                .and_compute_with(|current| {
                    // The entry may have been rewritten since the scan.
                    let op = match current {
                        Some(current) if current.value().is_expired_at(now) => {
                            indexes.write().remove(current.value());
                            Op::Remove
                        }
                        _ => Op::Nop,
                    };
                    std::future::ready(op)
                })
                .await;
            if matches!(outcome, CompResult::Removed(_)) {
                purged += 1;
            }
        }

        if purged > 0 {
            debug!("[{}] purged {purged} expired entries", self.name());
        }
        purged
    }

    /// Starts a task that purges expired entries every `interval`. Abort the returned handle to stop it.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.purge_expired(chrono::Utc::now().timestamp()).await;
            }
        })
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    #[instrument(level = "trace", skip(self, entry), fields(id = %entry.id))]
    async fn put_entry(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let indexes = self.indexes();
        self.table()
            .entry(entry.id.clone())
            .and_compute_with(|current| {
                {
                    let mut indexes = indexes.write();
                    if let Some(current) = current {
                        indexes.remove(current.value());
                    }
                    indexes.insert(&entry);
                }
                std::future::ready(Op::Put(entry))
            })
            .await;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.table().get(id).await)
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete_entry(&self, id: &str) -> Result<(), CacheError> {
        let indexes = self.indexes();
        self.table()
            .entry(id.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(current) => {
                        indexes.write().remove(current.value());
                        Op::Remove
                    }
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn query_index(
        &self,
        query: &IndexQuery,
        after: Option<&IndexCursor>,
        limit: usize,
    ) -> Result<Page, CacheError> {
        Ok(self.indexes().read().page(query, after, limit.max(1)))
    }
}
