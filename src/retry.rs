use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::context::OpContext;
use crate::error::CacheError;

/// Exponential backoff for one class of transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts:        u32,
    /// Backoff before the first retry.
    #[serde(with = "millis")]
    pub initial_interval:    Duration,
    /// Multiplier applied to the interval for every past retry.
    pub backoff_coefficient: u32,
    #[serde(default, with = "opt_millis")]
    pub maximum_interval:    Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval,
            backoff_coefficient: 2,
            maximum_interval: None,
        }
    }

    pub fn with_maximum_interval(mut self, maximum: Duration) -> Self {
        self.maximum_interval = Some(maximum);
        self
    }

    /// 100ms, doubling, five attempts.
    pub fn throttling() -> Self {
        Self::new(5, Duration::from_millis(100))
    }

    /// 1s, doubling, three attempts.
    pub fn network() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    /// Backoff after the `retry`-th failed attempt (zero-based).
    pub fn time_until_next_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_coefficient.saturating_pow(retry);
        let candidate = self.initial_interval.saturating_mul(factor);
        match self.maximum_interval {
            Some(max) => candidate.min(max),
            None => candidate,
        }
    }
}

/// The pair of policies applied to every store call. Either half may be omitted when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    #[serde(default = "RetryPolicy::throttling")]
    pub throttling: RetryPolicy,
    #[serde(default = "RetryPolicy::network")]
    pub network:    RetryPolicy,
}

impl RetryPolicies {
    /// Never retry; handy for tests and for callers that bring their own policy.
    pub fn none() -> Self {
        Self {
            throttling: RetryPolicy::new(1, Duration::ZERO),
            network:    RetryPolicy::new(1, Duration::ZERO),
        }
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            throttling: RetryPolicy::throttling(),
            network:    RetryPolicy::network(),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or exhausts the attempts allowed for the
/// kind of transient error it keeps producing. Backoff sleeps honour the context's cancellation.
///
/// The surfaced error keeps its kind and reports the total number of attempts made.
pub async fn with_retry<T, F, Fut>(
    policies: &RetryPolicies,
    ctx: &OpContext,
    operation: &str,
    mut f: F,
) -> Result<T, CacheError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    let mut throttled = 0u32;
    let mut failed = 0u32;

    loop {
        let err = match f().await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };

        let (policy, attempt) = match err {
            CacheError::Throttling { .. } => {
                throttled += 1;
                (&policies.throttling, throttled)
            }
            CacheError::Network { .. } => {
                failed += 1;
                (&policies.network, failed)
            }
            err => return Err(err),
        };

        let attempts = throttled + failed;
        if attempt >= policy.max_attempts.max(1) {
            warn!(operation, attempts, error = %err, "giving up after transient errors");
            return Err(err.with_attempts(attempts));
        }

        let delay = policy.time_until_next_retry(attempt - 1);
        debug!(
            operation,
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retrying after transient error"
        );
        ctx.sleep(delay).await?;
    }
}

mod millis {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreKind;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::throttling().with_maximum_interval(Duration::from_millis(500));
        assert_eq!(policy.time_until_next_retry(0), Duration::from_millis(100));
        assert_eq!(policy.time_until_next_retry(1), Duration::from_millis(200));
        assert_eq!(policy.time_until_next_retry(2), Duration::from_millis(400));
        assert_eq!(policy.time_until_next_retry(3), Duration::from_millis(500));
    }

    #[test]
    fn oversized_intervals_serialize_saturated() {
        let policy = RetryPolicy::new(1, Duration::MAX).with_maximum_interval(Duration::MAX);
        let value = serde_json::to_value(policy).unwrap();
        assert_eq!(value["initial_interval"], serde_json::json!(u64::MAX));
        assert_eq!(value["maximum_interval"], serde_json::json!(u64::MAX));

        let policy = RetryPolicy::throttling();
        let value = serde_json::to_value(policy).unwrap();
        assert_eq!(value["initial_interval"], serde_json::json!(100));
        assert!(value["maximum_interval"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_is_retried_up_to_five_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let outcome: Result<(), _> = with_retry(&RetryPolicies::default(), &OpContext::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::throttling(StoreKind::Cache, "slow down")) }
        })
        .await;

        let err = outcome.unwrap_err();
        assert!(matches!(err, CacheError::Throttling { attempts: 5, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 100 + 200 + 400 + 800
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_get_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome: Result<(), _> = with_retry(&RetryPolicies::default(), &OpContext::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::network(StoreKind::Primary, "connection reset")) }
        })
        .await;

        assert!(matches!(outcome.unwrap_err(), CacheError::Network { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = with_retry(&RetryPolicies::default(), &OpContext::new(), "test", || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err(CacheError::throttling(StoreKind::Cache, "slow down")),
                    1 => Err(CacheError::network(StoreKind::Cache, "timeout")),
                    _ => Ok("done"),
                }
            }
        })
        .await;

        assert_eq!(outcome.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_and_not_found_are_final() {
        for err in [
            CacheError::validation("bad"),
            CacheError::not_found(StoreKind::Cache, "x"),
            CacheError::unavailable(StoreKind::Cache, "down"),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let mut err = Some(err);

            let outcome: Result<(), _> = with_retry(&RetryPolicies::default(), &OpContext::new(), "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                let err = err.take().expect("called once");
                async move { Err(err) }
            })
            .await;

            assert!(!outcome.unwrap_err().is_retryable());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(150));

        let outcome: Result<(), _> = with_retry(&RetryPolicies::default(), &ctx, "test", || async {
            Err(CacheError::network(StoreKind::Cache, "timeout"))
        })
        .await;

        assert!(outcome.unwrap_err().is_cancelled());
    }
}
