// Progressive loader: materialize the next unfetched candidates of a session.
//
// Profiles resolve through the profile cache, their qualifying companies
// through the company cache. One failed identifier never sinks the batch;
// it is reported and left unfetched so a later call retries it. Cache
// writes land before the session commit, so work done before a cancellation
// is still served from cache next time.
//
// Upstream resolutions of one call share a single permit pool, profiles and
// companies alike, so `concurrency` bounds the calls in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, CompanyCache, ProfileCache};
use crate::error::{Result, SourcingError};
use crate::keys::{CandidateKey, CompanyKey};
use crate::manager::{SessionManager, DEFAULT_CLAIM_LEASE};
use crate::profile::{experiences, CompanyFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Concurrent upstream resolutions per call.
    pub concurrency: usize,
    pub company_filter: CompanyFilter,
    /// How long ids picked by a fetch stay claimed if it never finishes.
    pub claim_lease: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            company_filter: CompanyFilter::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyEnrichment {
    pub key: CompanyKey,
    pub data: serde_json::Value,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedProfile {
    pub key: CandidateKey,
    pub profile: serde_json::Value,
    pub from_cache: bool,
    /// Served from a cache record past the freshness window.
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
    pub companies: Vec<CompanyEnrichment>,
    pub company_failures: Vec<FetchFailure>,
}

/// One identifier that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub key: String,
    pub error: String,
    pub retryable: bool,
}

impl FetchFailure {
    fn new(key: impl ToString, error: &SourcingError) -> Self {
        Self {
            key: key.to_string(),
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedBatch {
    pub session_id: Uuid,
    /// Successes, in discovery order.
    pub profiles: Vec<MaterializedProfile>,
    /// Identifiers left unfetched by this call.
    pub failures: Vec<FetchFailure>,
    pub cache_stats: CacheStats,
    pub total_discovered: usize,
    pub total_fetched: usize,
    pub remaining: usize,
}

impl FetchedBatch {
    /// Some identifiers failed while others succeeded.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchNext {
    Fetched(FetchedBatch),
    /// Every discovered id is fetched or claimed by another in-flight call.
    NothingLeft {
        session_id: Uuid,
        total_discovered: usize,
        total_fetched: usize,
    },
}

pub struct ProgressiveLoader {
    manager: Arc<SessionManager>,
    profiles: ProfileCache,
    companies: CompanyCache,
    config: LoaderConfig,
    permits: Semaphore,
}

impl ProgressiveLoader {
    pub fn new(
        manager: Arc<SessionManager>,
        profiles: ProfileCache,
        companies: CompanyCache,
        config: LoaderConfig,
    ) -> Self {
        Self {
            manager,
            profiles,
            companies,
            permits: Semaphore::new(config.concurrency.max(1)),
            config,
        }
    }

    /// Materialize up to `batch_size` of the session's unfetched candidates.
    pub async fn fetch_next(&self, session_id: Uuid, batch_size: usize) -> Result<FetchNext> {
        if batch_size == 0 {
            return Err(SourcingError::InvalidBatchConfig(
                "fetch batch size must be at least 1".to_string(),
            ));
        }

        let (claimed, summary) = self
            .manager
            .reserve_unfetched(session_id, batch_size)
            .await?;
        if claimed.is_empty() {
            info!(session_id = %session_id, "Nothing left to fetch");
            return Ok(FetchNext::NothingLeft {
                session_id,
                total_discovered: summary.total_discovered,
                total_fetched: summary.total_fetched,
            });
        }
        let mut claims = ClaimGuard::new(self.manager.clone(), session_id, claimed.clone());

        let concurrency = self.config.concurrency.max(1);
        let outcomes: Vec<(CandidateKey, Result<MaterializedProfile>, CacheStats)> =
            stream::iter(claimed.iter().cloned())
                .map(|key| async move {
                    let (result, stats) = self.materialize(&key).await;
                    (key, result, stats)
                })
                .buffered(concurrency)
                .collect()
                .await;

        let mut cache_stats = CacheStats::default();
        let mut profiles = Vec::new();
        let mut failures = Vec::new();
        let mut first_error: Option<SourcingError> = None;
        let mut any_not_found = false;

        for (key, result, stats) in outcomes {
            cache_stats.merge(&stats);

            match result {
                Ok(profile) => profiles.push(profile),
                Err(e) => {
                    warn!(session_id = %session_id, key = %key, error = %e, "Profile fetch failed");
                    any_not_found |= matches!(e, SourcingError::UpstreamNotFound(_));
                    failures.push(FetchFailure::new(&key, &e));
                    first_error.get_or_insert(e);
                }
            }
        }

        // Nothing succeeded and no failure was about a missing record: the
        // upstream itself is out or misconfigured, so the call fails as a whole.
        if profiles.is_empty() && !any_not_found {
            if let Some(e) = first_error {
                warn!(session_id = %session_id, error = %e, "Fetch failed for the whole batch");
                claims.disarm();
                if let Err(release_err) = self.manager.release_claims(session_id, &claimed).await {
                    warn!(session_id = %session_id, error = %release_err, "Failed to release fetch claims");
                }
                return Err(e);
            }
        }

        let fetched: Vec<CandidateKey> = profiles.iter().map(|p| p.key.clone()).collect();
        let session = self
            .manager
            .commit_fetched(session_id, &claimed, &fetched)
            .await?;
        claims.disarm();

        info!(
            session_id = %session_id,
            fetched = profiles.len(),
            failed = failures.len(),
            profile_hits = cache_stats.profile_hits,
            profile_misses = cache_stats.profile_misses,
            company_hits = cache_stats.company_hits,
            company_misses = cache_stats.company_misses,
            hit_rate = cache_stats.hit_rate(),
            "Fetched profile batch"
        );

        Ok(FetchNext::Fetched(FetchedBatch {
            session_id,
            profiles,
            failures,
            cache_stats,
            total_discovered: session.discovered_ids.len(),
            total_fetched: session.fetched_ids.len(),
            remaining: session.remaining(),
        }))
    }

    /// Resolve one profile and its qualifying companies.
    async fn materialize(&self, key: &CandidateKey) -> (Result<MaterializedProfile>, CacheStats) {
        let mut stats = CacheStats::default();

        let resolved = match self.with_permit(self.profiles.resolve(key)).await {
            Ok(resolved) => resolved,
            Err(e) => return (Err(e), stats),
        };
        stats.record_profile(&resolved);

        let company_keys = self
            .config
            .company_filter
            .select(&experiences(&resolved.payload));

        let enrichments: Vec<_> = stream::iter(company_keys)
            .map(|company| async move {
                let result = self.with_permit(self.companies.resolve(&company)).await;
                (company, result)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut companies = Vec::new();
        let mut company_failures = Vec::new();
        for (company, result) in enrichments {
            match result {
                Ok(r) => {
                    stats.record_company(&r);
                    companies.push(CompanyEnrichment {
                        key: company,
                        data: r.payload,
                        from_cache: r.hit,
                    });
                }
                Err(e) => {
                    warn!(key = %key, company = %company, error = %e, "Company enrichment failed");
                    company_failures.push(FetchFailure::new(&company, &e));
                }
            }
        }

        let profile = MaterializedProfile {
            key: key.clone(),
            profile: resolved.payload,
            from_cache: resolved.hit,
            stale: resolved.stale,
            fetched_at: resolved.fetched_at,
            companies,
            company_failures,
        };
        (Ok(profile), stats)
    }

    /// Run one upstream resolution under a permit. A profile releases its
    /// permit before its companies take theirs, so nesting cannot starve.
    async fn with_permit<T>(&self, resolve: impl Future<Output = Result<T>>) -> Result<T> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("Fetch permit pool closed"))?;
        resolve.await
    }
}

/// Claims of one in-flight fetch. If the fetch is dropped before it commits
/// or releases, the claims are handed back in the background instead of
/// waiting out the lease.
struct ClaimGuard {
    manager: Arc<SessionManager>,
    session_id: Uuid,
    keys: Vec<CandidateKey>,
    armed: bool,
}

impl ClaimGuard {
    fn new(manager: Arc<SessionManager>, session_id: Uuid, keys: Vec<CandidateKey>) -> Self {
        Self {
            manager,
            session_id,
            keys,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let manager = self.manager.clone();
        let session_id = self.session_id;
        let keys = std::mem::take(&mut self.keys);
        handle.spawn(async move {
            if let Err(e) = manager.release_claims(session_id, &keys).await {
                warn!(session_id = %session_id, error = %e, "Failed to release abandoned fetch claims");
            }
        });
    }
}
