use std::num::NonZeroU32;

use governor::DefaultDirectRateLimiter;
use governor::Quota;
use tracing::trace;

use crate::context::OpContext;
use crate::error::CacheError;

/// Token bucket guarding the cache store.
///
/// Capacity and refill rate both equal the configured requests per second: the bucket starts full and regains one
/// token every `1s / rps`, never holding more than its capacity. Construct one instance and share it by `Arc` among
/// every component that talks to the cache store.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    limiter:  DefaultDirectRateLimiter,
}

impl RateLimiter {
    /// Fails with [`CacheError::Configuration`] for a zero rate.
    pub fn new(requests_per_second: u32) -> Result<Self, CacheError> {
        let rate = NonZeroU32::new(requests_per_second)
            .ok_or_else(|| CacheError::Configuration("requests per second must be greater than 0".to_string()))?;

        Ok(Self {
            capacity: rate.get(),
            limiter:  governor::RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Waits for a token. Fails with [`CacheError::Cancelled`] if the context is cancelled or runs past its
    /// deadline while waiting.
    pub async fn acquire(&self, ctx: &OpContext) -> Result<(), CacheError> {
        if ctx.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        if self.try_acquire() {
            return Ok(());
        }

        trace!(capacity = self.capacity, "rate limiter bucket is empty");
        ctx.run(async {
            self.limiter.until_ready().await;
            Ok(())
        })
        .await
    }
}
