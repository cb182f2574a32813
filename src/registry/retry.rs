//! Bounded retry with exponential backoff for transient registry failures

use crate::config::RegistryConfig;
use crate::error::BaseImageResult;
use crate::image::{Artifact, Digest, Reference};
use crate::registry::RegistryClient;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// How often and how patiently transient failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Sleep before the first retry; doubled for each further retry
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Sleep before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, reference: &Reference, mut call: F) -> BaseImageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BaseImageResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} {} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, reference, attempt, attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

/// Wraps a client and retries its transient failures
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: RegistryClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: RegistryClient> RegistryClient for RetryingClient<C> {
    async fn digest(&self, reference: &Reference) -> BaseImageResult<Digest> {
        self.policy
            .run("digest", reference, || self.inner.digest(reference))
            .await
    }

    async fn fetch(&self, reference: &Reference) -> BaseImageResult<Artifact> {
        self.policy
            .run("fetch", reference, || self.inner.fetch(reference))
            .await
    }
}
