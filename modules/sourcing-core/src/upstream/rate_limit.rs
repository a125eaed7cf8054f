use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::PreviewCollector;
use crate::error::Result;
use crate::keys::CandidateKey;
use crate::session::SearchQuery;

/// Runs preview queries one at a time with at least `min_interval` between
/// the start of consecutive calls.
pub struct RateLimitedPreview<P> {
    inner: P,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<P> RateLimitedPreview<P> {
    pub fn new(inner: P, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Spacing that yields at most `per_minute` queries per minute.
    pub fn per_minute(inner: P, per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        Self::new(inner, Duration::from_secs(60) / per_minute)
    }
}

#[async_trait]
impl<P: PreviewCollector> PreviewCollector for RateLimitedPreview<P> {
    async fn search(&self, query: &SearchQuery, companies: &[String]) -> Result<Vec<CandidateKey>> {
        // Held across the call: preview queries are strictly serial.
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let ready_at = last + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!(wait_ms = (ready_at - now).as_millis() as u64, "Waiting for preview rate limit");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
        self.inner.search(query, companies).await
    }
}
