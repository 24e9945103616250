use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;

/// Per-call context: cancellation, an optional deadline and the dry-run switch.
///
/// Cloning is cheap; clones share the cancellation token.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel:   CancellationToken,
    deadline: Option<Instant>,
    dry_run:  bool,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| d <= Instant::now())
    }

    /// A context unaffected by this one's cancellation and deadline, bounded by its own timeout. Used for work
    /// that must run even after the caller gave up, such as compensating a half-done write.
    pub fn detached(&self, timeout: Duration) -> Self {
        Self {
            cancel:   CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
            dry_run:  self.dry_run,
        }
    }

    /// Drives `fut` to completion unless the context is cancelled or its deadline passes first. In the latter case
    /// the future is dropped, which aborts whatever request it had in flight.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CacheError::Cancelled),
            _ = Self::deadline_passed(self.deadline) => Err(CacheError::Cancelled),
            outcome = fut => outcome,
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), CacheError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    async fn deadline_passed(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
