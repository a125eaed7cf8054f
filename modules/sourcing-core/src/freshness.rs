// Age-based freshness tiers. A cache record carries only `fetched_at`;
// its tier is derived at read time from the policy of its cache kind.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Serve as-is.
    Fresh,
    /// Serve, but tell the caller the record is stale.
    Stale,
    /// Treat as absent and refetch.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Age at which a record starts being flagged stale. `None` means records
    /// go straight from fresh to expired.
    pub stale_after: Option<Duration>,
    pub expire_after: Duration,
}

impl FreshnessPolicy {
    /// Profiles: fresh under 3 days, stale until 90, expired from 90.
    pub fn profile() -> Self {
        Self {
            stale_after: Some(Duration::days(3)),
            expire_after: Duration::days(90),
        }
    }

    /// Companies: single 30-day horizon.
    pub fn company() -> Self {
        Self {
            stale_after: None,
            expire_after: Duration::days(30),
        }
    }

    pub fn classify(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        let age = now - fetched_at;
        if age >= self.expire_after {
            return Freshness::Expired;
        }
        match self.stale_after {
            Some(stale_after) if age >= stale_after => Freshness::Stale,
            _ => Freshness::Fresh,
        }
    }
}
