//! # wt-cache
//!
//! Write-through cache consistency engine for documents whose source of truth is a slow, durable object store.
//!
//! Think of it as a queryable, indexed mirror that stays in step with the object store.
//!
//! # The Basics
//!
//! The `wt-cache` crate is designed for the following use case:
//!
//! - Semi-structured JSON documents (changes, announcements) live as objects in a primary store with no secondary
//!   indexes and high read latency.
//! - Readers need point lookups and time-ordered queries by type, by customer and by status.
//! - Some writers bypass the engine and mutate the primary store directly; the store emits change notifications for
//!   those mutations.
//!
//! The engine operates on the following principles:
//!
//! - It is backend-agnostic: both stores are traits ([`CacheStore`], [`PrimaryStore`]).
//! - The primary store is always right. Cache entries expire after a TTL and can always be rebuilt from it.
//! - Cache traffic goes through one shared token bucket ([`RateLimiter`]) and a retry policy that absorbs throttling
//!   and transient network errors.
//! - Every operation takes an [`OpContext`] carrying cancellation, an optional deadline and the dry-run switch.
//! - Fully async.
//!
//! # Components
//!
//! - [`CacheManager`] owns all cache store traffic: upserts, deletes, point reads and paginated index queries.
//! - [`WriteThroughHandler`] writes the cache, then the primary store, and rolls the cache back if the second write
//!   fails.
//! - [`ChangeNotificationHandler`] re-synchronizes the cache after out-of-band primary store mutations. Notifications
//!   may come duplicated and in any order; handling is idempotent.
//! - [`FallbackReader`] reads through the cache, degrades to the primary store when the cache misses or is unhealthy,
//!   and backfills the cache afterwards.
//! - [`Engine`] wires all of the above from an [`EngineConfig`].
//!
//! Two in-process stores come with the crate, see the [`backend`] module.
//!
//! ```ignore
//! use wt_cache::prelude::*;
//!
//! let engine = Engine::new(EngineConfig::default(), MemoryCacheStore::builder().build()?, MemoryObjectStore::new())?;
//! let ctx = OpContext::new();
//!
//! let doc = Document::new("CHG-1", DocumentType::Change, vec!["hts".into(), "cds".into()], 1000);
//! let locator = engine.writer().write_document(&doc, &ctx).await?;
//!
//! let for_hts = engine
//!     .cache()
//!     .query_by_customer_and_time("hts", 0, 2000, &ctx)
//!     .try_collect::<Vec<_>>()
//!     .await?;
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod converter;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod fanout;
pub mod notification;
pub mod rate_limiter;
pub mod retry;
pub mod traits;
pub mod types;
pub mod write_through;

#[doc(inline)]
pub use backend::MemoryCacheStore;
#[doc(inline)]
pub use backend::MemoryObjectStore;
#[doc(inline)]
pub use cache::CacheManager;
#[doc(inline)]
pub use config::BackfillMode;
#[doc(inline)]
pub use config::EngineConfig;
#[doc(inline)]
pub use context::OpContext;
#[doc(inline)]
pub use converter::ItemConverter;
#[doc(inline)]
pub use engine::Engine;
#[doc(inline)]
pub use error::CacheError;
#[doc(inline)]
pub use fallback::FallbackReader;
#[doc(inline)]
pub use fanout::fan_out;
#[doc(inline)]
pub use notification::ChangeNotificationHandler;
#[doc(inline)]
pub use rate_limiter::RateLimiter;
#[doc(inline)]
pub use traits::CacheStore;
#[doc(inline)]
pub use traits::PrimaryStore;
#[doc(inline)]
pub use write_through::WriteThroughHandler;

pub mod prelude {
    pub use crate::backend::MemoryCacheStore;
    pub use crate::backend::MemoryObjectStore;
    pub use crate::cache::CacheManager;
    pub use crate::cache::EntryStream;
    pub use crate::config::BackfillMode;
    pub use crate::config::EngineConfig;
    pub use crate::context::OpContext;
    pub use crate::engine::Engine;
    pub use crate::error::CacheError;
    pub use crate::error::StoreKind;
    pub use crate::fanout::fan_out;
    pub use crate::notification::NotificationOutcome;
    pub use crate::retry::RetryPolicies;
    pub use crate::retry::RetryPolicy;
    pub use crate::traits::CacheStore;
    pub use crate::traits::PrimaryStore;
    pub use crate::types::*;
    pub use futures::TryStreamExt;
}
