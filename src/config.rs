use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CacheError;
use crate::retry::RetryPolicies;
use crate::types::KeyLayout;

/// How the fallback reader repopulates the cache after serving a document from the primary store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillMode {
    /// Put the entry before returning the document.
    #[default]
    Sync,
    /// Put the entry on a spawned task; the reader returns immediately.
    Async,
    Off,
}

/// Engine settings. Every field has a default, so a partial document deserializes into a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ttl_days:                u32,
    pub requests_per_second:     u32,
    /// When off, writes go to the primary store only, reads never consult the cache and notifications are
    /// acknowledged without action.
    pub cache_enabled:           bool,
    pub page_size:               usize,
    pub bucket:                  String,
    pub key_prefix:              String,
    pub backfill:                BackfillMode,
    /// Budget for rolling back a cache entry after the primary write failed.
    pub compensation_timeout_ms: u64,
    pub cache_retry:             RetryPolicies,
    pub primary_retry:           RetryPolicies,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.ttl_days == 0 {
            return Err(CacheError::Configuration("ttl_days must be positive".to_string()));
        }
        if self.requests_per_second == 0 {
            return Err(CacheError::Configuration("requests_per_second must be positive".to_string()));
        }
        if self.page_size == 0 {
            return Err(CacheError::Configuration("page_size must be positive".to_string()));
        }
        if self.bucket.trim().is_empty() {
            return Err(CacheError::Configuration("bucket must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(&self.bucket, &self.key_prefix)
    }

    pub fn compensation_timeout(&self) -> Duration {
        Duration::from_millis(self.compensation_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl_days:                90,
            requests_per_second:     100,
            cache_enabled:           true,
            page_size:               100,
            bucket:                  "documents".to_string(),
            key_prefix:              String::new(),
            backfill:                BackfillMode::default(),
            compensation_timeout_ms: 30_000,
            cache_retry:             RetryPolicies::default(),
            primary_retry:           RetryPolicies::default(),
        }
    }
}
