// Session manager: the only writer of session state.
//
// Every read-modify-write of a session runs under that session's lock.
// Sessions on different ids never contend. Writes also carry the session
// version, so a second process writing the same row is detected and the
// change is reapplied to the fresh row rather than silently overwriting it.
//
// Ids picked by an in-flight fetch are claimed on the session row itself,
// with a lease, so fetches from separate processes take disjoint ids. A
// fetch that dies without releasing its claims frees them when the lease
// runs out.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::split_into_batches;
use crate::error::{Result, SourcingError};
use crate::keys::CandidateKey;
use crate::locks::KeyedLocks;
use crate::session::{
    BatchAdvance, BatchDiscovery, SearchQuery, SearchSession, SessionCreated, SessionSummary,
};
use crate::store::SessionStore;
use crate::upstream::PreviewCollector;

/// Reapplying an idempotent change after a version conflict is safe; give up
/// after this many attempts.
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Default lifetime of a fetch claim.
pub const DEFAULT_CLAIM_LEASE: std::time::Duration = std::time::Duration::from_secs(15 * 60);

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    preview: Arc<dyn PreviewCollector>,
    locks: KeyedLocks<Uuid>,
    claim_lease: chrono::Duration,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, preview: Arc<dyn PreviewCollector>) -> Self {
        Self {
            sessions,
            preview,
            locks: KeyedLocks::new(),
            claim_lease: lease(DEFAULT_CLAIM_LEASE),
        }
    }

    /// How long fetch claims hold before another caller may take the ids.
    pub fn with_claim_lease(mut self, claim_lease: std::time::Duration) -> Self {
        self.claim_lease = lease(claim_lease);
        self
    }

    /// Split `companies`, run batch 0 against the preview API, and persist the
    /// new session with whatever it discovered.
    pub async fn create_session(
        &self,
        query: SearchQuery,
        companies: &[String],
        batch_size: usize,
    ) -> Result<SessionCreated> {
        if companies.is_empty() {
            return Err(SourcingError::EmptyCompanyList);
        }
        let batches = split_into_batches(companies, batch_size)?;

        let mut session = SearchSession::new(query, batches);
        let returned = self
            .preview
            .search(&session.query, &session.company_batches[0])
            .await?;
        let returned_count = returned.len();
        let new_ids = session.merge_discovered(returned);

        self.sessions.insert(&session).await?;

        info!(
            session_id = %session.id,
            total_batches = session.total_batches(),
            returned = returned_count,
            discovered = new_ids.len(),
            "Search session created"
        );

        Ok(SessionCreated {
            session_id: session.id,
            first_batch_result_count: new_ids.len(),
            total_batches: session.total_batches(),
        })
    }

    /// Run the next company batch and merge its ids into the session.
    /// On the last batch this returns `NoMoreBatches` and changes nothing.
    pub async fn advance_batch(&self, session_id: Uuid) -> Result<BatchAdvance> {
        let _guard = self.locks.lock(&session_id).await;
        let session = self.load_active(session_id).await?;

        if !session.has_more_batches() {
            info!(session_id = %session_id, "No more batches");
            return Ok(BatchAdvance::NoMoreBatches {
                total_discovered: session.discovered_ids.len(),
                total_batches: session.total_batches(),
            });
        }

        let next = session.batch_index + 1;
        let companies = session.company_batches[next].clone();
        // Nothing is written until the search succeeds, so a failed batch can
        // simply be re-run.
        let returned = self.preview.search(&session.query, &companies).await?;
        let returned_count = returned.len();

        // Claims and fetched ids may have moved in another process meanwhile;
        // merge into the current row. If the batch itself moved, ours is void.
        let (new_ids, session) = self
            .apply(session_id, |current| {
                if !current.is_active {
                    return Err(SourcingError::SessionInactive(session_id));
                }
                if current.batch_index + 1 != next {
                    return Err(SourcingError::SessionConflict(session_id));
                }
                current.batch_index = next;
                let new_ids = current.merge_discovered(returned.iter().cloned());
                current.touch();
                Ok(new_ids)
            })
            .await?;

        info!(
            session_id = %session_id,
            batch = next,
            returned = returned_count,
            new = new_ids.len(),
            total_discovered = session.discovered_ids.len(),
            "Batch advanced"
        );

        Ok(BatchAdvance::Advanced(BatchDiscovery {
            batch_index: next,
            companies,
            new_ids,
            returned: returned_count,
            total_discovered: session.discovered_ids.len(),
            total_batches: session.total_batches(),
            has_more_batches: session.has_more_batches(),
        }))
    }

    /// Active sessions, most recently accessed first.
    pub async fn list_active_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.list_active(limit).await?;
        Ok(sessions.iter().map(SearchSession::summary).collect())
    }

    /// Summary for one session. Reading an active session counts as an access.
    pub async fn session_status(&self, session_id: Uuid) -> Result<SessionSummary> {
        let _guard = self.locks.lock(&session_id).await;
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(SourcingError::SessionNotFound(session_id))?;
        if !session.is_active {
            return Ok(session.summary());
        }

        let ((), session) = self
            .apply(session_id, |session| {
                session.touch();
                Ok(())
            })
            .await?;
        Ok(session.summary())
    }

    /// Soft-delete. Deactivating an inactive session succeeds and does nothing.
    pub async fn deactivate_session(&self, session_id: Uuid) -> Result<()> {
        let _guard = self.locks.lock(&session_id).await;
        if !self.sessions.deactivate(session_id).await? {
            return Err(SourcingError::SessionNotFound(session_id));
        }
        info!(session_id = %session_id, "Session deactivated");
        Ok(())
    }

    pub async fn deactivate_all(&self) -> Result<u64> {
        let count = self.sessions.deactivate_all().await?;
        info!(count, "All sessions deactivated");
        Ok(count)
    }

    /// Administrative hard delete of every session.
    pub async fn purge_all_sessions(&self) -> Result<u64> {
        let count = self.sessions.purge_all().await?;
        warn!(count, "All sessions purged");
        Ok(count)
    }

    /// Claim up to `limit` unfetched ids that no live claim holds. Counts as
    /// an access even when nothing is left to claim.
    pub(crate) async fn reserve_unfetched(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<(Vec<CandidateKey>, SessionSummary)> {
        let _guard = self.locks.lock(&session_id).await;
        let claim_lease = self.claim_lease;

        let (keys, session) = self
            .apply(session_id, |session| {
                if !session.is_active {
                    return Err(SourcingError::SessionInactive(session_id));
                }
                let now = Utc::now();
                let keys = session.claim_unfetched(limit, now, now + claim_lease);
                session.touch();
                Ok(keys)
            })
            .await?;

        Ok((keys, session.summary()))
    }

    /// Drop the claims on `claimed` and record `fetched` as materialized.
    pub(crate) async fn commit_fetched(
        &self,
        session_id: Uuid,
        claimed: &[CandidateKey],
        fetched: &[CandidateKey],
    ) -> Result<SearchSession> {
        let _guard = self.locks.lock(&session_id).await;

        let ((), session) = self
            .apply(session_id, |session| {
                session.release_claims(claimed);
                session.mark_fetched(fetched);
                session.touch();
                Ok(())
            })
            .await?;
        Ok(session)
    }

    /// Give claimed ids back without marking anything fetched.
    pub(crate) async fn release_claims(
        &self,
        session_id: Uuid,
        claimed: &[CandidateKey],
    ) -> Result<()> {
        let _guard = self.locks.lock(&session_id).await;
        self.apply(session_id, |session| {
            session.release_claims(claimed);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Load, change and write back one session, reloading and reapplying
    /// `change` when another writer got there first. Callers hold the
    /// session lock.
    async fn apply<T, F>(&self, session_id: Uuid, mut change: F) -> Result<(T, SearchSession)>
    where
        F: FnMut(&mut SearchSession) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            let mut session = self
                .sessions
                .get(session_id)
                .await?
                .ok_or(SourcingError::SessionNotFound(session_id))?;
            let out = change(&mut session)?;

            match self.sessions.update(&mut session).await {
                Ok(()) => return Ok((out, session)),
                Err(SourcingError::SessionConflict(_)) if attempt < MAX_CONFLICT_RETRIES => {
                    warn!(session_id = %session_id, attempt, "Session write conflict, reapplying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn load_active(&self, session_id: Uuid) -> Result<SearchSession> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(SourcingError::SessionNotFound(session_id))?;
        if !session.is_active {
            return Err(SourcingError::SessionInactive(session_id));
        }
        Ok(session)
    }
}

fn lease(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::minutes(15))
}
