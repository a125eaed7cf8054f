// Freshness-tiered caches in front of the collect API.
//
// resolve(key) serves a stored record when its tier allows, and otherwise
// fetches upstream, writes exactly one record, and reports a miss. A failed
// fetch writes nothing, so the next access retries.
//
// Racing misses on one key make a single upstream call. Within a process a
// keyed lock orders them; across processes the store's claim marker does,
// and the loser polls until the record lands or the claim lapses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SourcingError};
use crate::freshness::{Freshness, FreshnessPolicy};
use crate::keys::{CandidateKey, CompanyKey};
use crate::locks::KeyedLocks;
use crate::store::{CacheKind, CacheRecord, CacheStore};
use crate::upstream::RecordCollector;

/// Outcome of a cache resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub payload: serde_json::Value,
    /// Served from storage without an upstream call.
    pub hit: bool,
    /// Served from storage, but old enough that the caller should know.
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

/// How long a fetch claim holds before another process may take it over.
/// Covers one collect call with its retries.
pub const CLAIM_LEASE: Duration = Duration::from_secs(300);

/// How often a resolution blocked on a foreign claim re-checks the store.
const CLAIM_POLL: Duration = Duration::from_millis(200);

pub struct TieredCache {
    kind: CacheKind,
    policy: FreshnessPolicy,
    store: Arc<dyn CacheStore>,
    in_flight: KeyedLocks<String>,
    claim_lease: Duration,
}

impl TieredCache {
    pub fn new(kind: CacheKind, policy: FreshnessPolicy, store: Arc<dyn CacheStore>) -> Self {
        Self {
            kind,
            policy,
            store,
            in_flight: KeyedLocks::new(),
            claim_lease: CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Serve `key` from storage if its tier allows, else call `fetch` and
    /// store the result. Concurrent misses on one key share a single fetch.
    pub async fn resolve<F, Fut>(&self, key: &str, fetch: F) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        if let Some(resolved) = self.lookup(key).await? {
            return Ok(resolved);
        }

        let key_owned = key.to_string();
        let _guard = self.in_flight.lock(&key_owned).await;

        // Another resolution may have filled the slot while we waited, here
        // or in another process.
        let claim = loop {
            if let Some(resolved) = self.lookup(key).await? {
                return Ok(resolved);
            }
            let expires_at = Utc::now()
                + chrono::Duration::from_std(self.claim_lease).unwrap_or_else(|_| chrono::Duration::minutes(5));
            if self.store.claim(self.kind, key, expires_at).await? {
                break FetchClaim::new(self.store.clone(), self.kind, key);
            }
            debug!(kind = self.kind.as_str(), key, "Record is being fetched elsewhere, waiting");
            tokio::time::sleep(CLAIM_POLL).await;
        };

        let payload = match fetch().await {
            Ok(payload) if !payload.is_null() => payload,
            Ok(_) => {
                claim.release().await;
                return Err(SourcingError::UpstreamNotFound(key_owned));
            }
            Err(e) => {
                claim.release().await;
                return Err(e);
            }
        };

        let record = CacheRecord {
            kind: self.kind,
            key: key_owned,
            payload,
            fetched_at: Utc::now(),
        };
        self.store.upsert(&record).await?;
        claim.release().await;
        info!(kind = self.kind.as_str(), key, "Cache miss, fetched upstream");

        Ok(Resolved {
            payload: record.payload,
            hit: false,
            stale: false,
            fetched_at: record.fetched_at,
        })
    }

    async fn lookup(&self, key: &str) -> Result<Option<Resolved>> {
        let Some(record) = self.store.get(self.kind, key).await? else {
            return Ok(None);
        };

        match self.policy.classify(record.fetched_at, Utc::now()) {
            Freshness::Fresh => {
                debug!(kind = self.kind.as_str(), key, "Cache hit");
                Ok(Some(Resolved {
                    payload: record.payload,
                    hit: true,
                    stale: false,
                    fetched_at: record.fetched_at,
                }))
            }
            Freshness::Stale => {
                info!(
                    kind = self.kind.as_str(),
                    key,
                    fetched_at = %record.fetched_at,
                    "Cache hit on stale record"
                );
                Ok(Some(Resolved {
                    payload: record.payload,
                    hit: true,
                    stale: true,
                    fetched_at: record.fetched_at,
                }))
            }
            Freshness::Expired => {
                info!(
                    kind = self.kind.as_str(),
                    key,
                    fetched_at = %record.fetched_at,
                    "Cached record expired, refetching"
                );
                Ok(None)
            }
        }
    }
}

/// A held fetch claim. Released explicitly once the fetch settles; if the
/// resolution is dropped first, released in the background.
struct FetchClaim {
    store: Arc<dyn CacheStore>,
    kind: CacheKind,
    key: String,
    armed: bool,
}

impl FetchClaim {
    fn new(store: Arc<dyn CacheStore>, kind: CacheKind, key: &str) -> Self {
        Self {
            store,
            kind,
            key: key.to_string(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.store.release(self.kind, &self.key).await {
            warn!(kind = self.kind.as_str(), key = %self.key, error = %e, "Failed to release fetch claim");
        }
    }
}

impl Drop for FetchClaim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let kind = self.kind;
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = store.release(kind, &key).await {
                warn!(kind = kind.as_str(), key = %key, error = %e, "Failed to release abandoned fetch claim");
            }
        });
    }
}

/// Full profiles keyed by candidate.
pub struct ProfileCache {
    cache: TieredCache,
    collector: Arc<dyn RecordCollector>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn CacheStore>, collector: Arc<dyn RecordCollector>) -> Self {
        Self {
            cache: TieredCache::new(CacheKind::Profile, FreshnessPolicy::profile(), store),
            collector,
        }
    }

    pub async fn resolve(&self, key: &CandidateKey) -> Result<Resolved> {
        self.cache
            .resolve(&key.to_string(), || self.collector.collect_profile(key))
            .await
    }
}

/// Company enrichment records keyed by company.
pub struct CompanyCache {
    cache: TieredCache,
    collector: Arc<dyn RecordCollector>,
}

impl CompanyCache {
    pub fn new(store: Arc<dyn CacheStore>, collector: Arc<dyn RecordCollector>) -> Self {
        Self {
            cache: TieredCache::new(CacheKind::Company, FreshnessPolicy::company(), store),
            collector,
        }
    }

    pub async fn resolve(&self, key: &CompanyKey) -> Result<Resolved> {
        self.cache
            .resolve(&key.to_string(), || self.collector.collect_company(key))
            .await
    }
}

/// Hit/miss counts across both cache layers for one loader call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub profile_hits: usize,
    pub profile_misses: usize,
    pub stale_profiles: usize,
    pub company_hits: usize,
    pub company_misses: usize,
}

impl CacheStats {
    pub fn record_profile(&mut self, resolved: &Resolved) {
        if resolved.hit {
            self.profile_hits += 1;
            if resolved.stale {
                self.stale_profiles += 1;
            }
        } else {
            self.profile_misses += 1;
        }
    }

    pub fn record_company(&mut self, resolved: &Resolved) {
        if resolved.hit {
            self.company_hits += 1;
        } else {
            self.company_misses += 1;
        }
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.profile_hits += other.profile_hits;
        self.profile_misses += other.profile_misses;
        self.stale_profiles += other.stale_profiles;
        self.company_hits += other.company_hits;
        self.company_misses += other.company_misses;
    }

    pub fn hits(&self) -> usize {
        self.profile_hits + self.company_hits
    }

    pub fn misses(&self) -> usize {
        self.profile_misses + self.company_misses
    }

    /// Fraction of resolutions served without an upstream call. Zero when
    /// nothing was resolved.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}
