use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keys::CandidateKey;

/// Caller-defined search criteria. Never interpreted here; passed to the
/// preview collector unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchQuery(pub serde_json::Value);

/// One resumable discovery query and its progress across company batches.
///
/// Invariants: `fetched_ids` is a subset of `discovered_ids`, `discovered_ids`
/// never shrinks, `batch_index < company_batches.len()`, and `query` is fixed
/// at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSession {
    pub id: Uuid,
    pub query: SearchQuery,
    pub company_batches: Vec<Vec<String>>,
    /// Index of the last executed batch. Batch 0 runs at creation.
    pub batch_index: usize,
    /// Candidates found so far, in discovery order.
    pub discovered_ids: IndexSet<CandidateKey>,
    pub fetched_ids: IndexSet<CandidateKey>,
    /// Ids held by in-flight fetches, possibly in other processes. A claim
    /// past its `expires_at` is ignored and may be taken over.
    #[serde(default)]
    pub fetch_claims: Vec<FetchClaim>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Bumped on every persisted write; stores reject stale writes.
    pub version: i64,
}

impl SearchSession {
    pub fn new(query: SearchQuery, company_batches: Vec<Vec<String>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query,
            company_batches,
            batch_index: 0,
            discovered_ids: IndexSet::new(),
            fetched_ids: IndexSet::new(),
            fetch_claims: Vec::new(),
            is_active: true,
            created_at: now,
            last_accessed: now,
            version: 0,
        }
    }

    pub fn total_batches(&self) -> usize {
        self.company_batches.len()
    }

    pub fn has_more_batches(&self) -> bool {
        self.batch_index + 1 < self.company_batches.len()
    }

    /// Set-union `ids` into the discovered set. Returns only the ids that
    /// were not already present, in the order they were first seen.
    pub fn merge_discovered(&mut self, ids: impl IntoIterator<Item = CandidateKey>) -> Vec<CandidateKey> {
        ids.into_iter()
            .filter(|id| self.discovered_ids.insert(id.clone()))
            .collect()
    }

    /// Up to `limit` discovered-but-unfetched ids in discovery order,
    /// skipping anything in `exclude`.
    pub fn next_unfetched(&self, limit: usize, exclude: &HashSet<CandidateKey>) -> Vec<CandidateKey> {
        self.discovered_ids
            .iter()
            .filter(|id| !self.fetched_ids.contains(*id) && !exclude.contains(*id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Claim up to `limit` unfetched ids that no live claim holds, until
    /// `expires_at`. Expired claims are dropped first.
    pub fn claim_unfetched(
        &mut self,
        limit: usize,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Vec<CandidateKey> {
        self.fetch_claims.retain(|c| c.expires_at > now);
        let held: HashSet<CandidateKey> = self.fetch_claims.iter().map(|c| c.key.clone()).collect();
        let keys = self.next_unfetched(limit, &held);
        self.fetch_claims.extend(keys.iter().map(|key| FetchClaim {
            key: key.clone(),
            expires_at,
        }));
        keys
    }

    /// Drop the claims on `keys`, whoever holds them.
    pub fn release_claims(&mut self, keys: &[CandidateKey]) {
        self.fetch_claims.retain(|c| !keys.contains(&c.key));
    }

    /// Record ids as materialized. Ids that were never discovered are ignored
    /// so the subset invariant cannot be broken.
    pub fn mark_fetched<'a>(&mut self, ids: impl IntoIterator<Item = &'a CandidateKey>) -> usize {
        let mut added = 0;
        for id in ids {
            if self.discovered_ids.contains(id) && self.fetched_ids.insert(id.clone()) {
                added += 1;
            }
        }
        added
    }

    pub fn remaining(&self) -> usize {
        self.discovered_ids.len() - self.fetched_ids.len()
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            total_discovered: self.discovered_ids.len(),
            total_fetched: self.fetched_ids.len(),
            current_batch: self.batch_index,
            total_batches: self.total_batches(),
            has_more_batches: self.has_more_batches(),
            is_active: self.is_active,
        }
    }
}

/// One in-flight fetch's hold on a discovered id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchClaim {
    pub key: CandidateKey,
    pub expires_at: DateTime<Utc>,
}

/// What callers see when listing sessions. Deliberately omits the query and
/// batch contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub total_discovered: usize,
    pub total_fetched: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub has_more_batches: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
    /// Distinct candidates returned by batch 0.
    pub first_batch_result_count: usize,
    pub total_batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDiscovery {
    pub batch_index: usize,
    pub companies: Vec<String>,
    /// Ids returned by this batch that the session had not seen before.
    pub new_ids: Vec<CandidateKey>,
    /// Ids returned by the preview query, duplicates included.
    pub returned: usize,
    pub total_discovered: usize,
    pub total_batches: usize,
    pub has_more_batches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchAdvance {
    Advanced(BatchDiscovery),
    /// Every batch has run. Session state is left untouched.
    NoMoreBatches {
        total_discovered: usize,
        total_batches: usize,
    },
}
