// Upstream collector boundary.
//
// Two metered services sit behind these traits: the preview search (cheap,
// capped at 100 ids per query) and the collect API (one paid unit per
// record). Production wires in the Apify-backed implementations; tests use
// the mocks.

mod apify;
mod mock;
mod rate_limit;

pub use apify::{ApifyCollector, ApifyPreview};
pub use mock::{MockCollector, MockFailure, MockPreview};
pub use rate_limit::RateLimitedPreview;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::error::{Result, SourcingError};
use crate::keys::{CandidateKey, CompanyKey};
use crate::session::SearchQuery;

/// Maximum ids a single preview query can yield (5 pages of 20).
pub const PREVIEW_RESULT_CAP: usize = 100;

#[async_trait]
pub trait PreviewCollector: Send + Sync {
    /// Lightweight candidate ids for `query` restricted to `companies`.
    /// Returns at most `PREVIEW_RESULT_CAP` ids; may contain duplicates.
    async fn search(&self, query: &SearchQuery, companies: &[String]) -> Result<Vec<CandidateKey>>;
}

#[async_trait]
pub trait RecordCollector: Send + Sync {
    async fn collect_profile(&self, key: &CandidateKey) -> Result<serde_json::Value>;
    async fn collect_company(&self, key: &CompanyKey) -> Result<serde_json::Value>;
}

/// Bounded retry with exponential backoff for retryable upstream errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; later retries wait `base * 3^attempt`.
    pub base_delay: Duration,
    /// Per-attempt deadline. Expiry counts as a retryable failure.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay * 3u32.saturating_pow(attempt);
        let jitter_cap = (self.base_delay.as_millis() as u64) / 4;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_cap));
        base + jitter
    }
}

/// Run `op` under the policy's timeout, retrying retryable failures.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(SourcingError::UpstreamTimeout(policy.timeout)),
        };

        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff(attempt);
                warn!(
                    label,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Upstream call failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Applies a `RetryPolicy` to every call of the wrapped collector.
pub struct Resilient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> Resilient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: PreviewCollector> PreviewCollector for Resilient<C> {
    async fn search(&self, query: &SearchQuery, companies: &[String]) -> Result<Vec<CandidateKey>> {
        retry_with_backoff(&self.policy, "preview_search", move || {
            self.inner.search(query, companies)
        })
        .await
    }
}

#[async_trait]
impl<C: RecordCollector> RecordCollector for Resilient<C> {
    async fn collect_profile(&self, key: &CandidateKey) -> Result<serde_json::Value> {
        retry_with_backoff(&self.policy, "collect_profile", move || {
            self.inner.collect_profile(key)
        })
        .await
    }

    async fn collect_company(&self, key: &CompanyKey) -> Result<serde_json::Value> {
        retry_with_backoff(&self.policy, "collect_company", move || {
            self.inner.collect_company(key)
        })
        .await
    }
}
