// Persistence boundary. The session manager and caches only see these
// traits; production wires in Postgres, tests use the in-memory store.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::session::SearchSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Profile,
    Company,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Profile => "profile",
            CacheKind::Company => "company",
        }
    }
}

/// A cached upstream record. Freshness is derived from `fetched_at` at read
/// time; nothing on the record says whether it is fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub kind: CacheKind,
    /// Storage form of a `CandidateKey` or `CompanyKey`.
    pub key: String,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheRecord>>;

    /// Insert or replace. Last writer wins.
    async fn upsert(&self, record: &CacheRecord) -> Result<()>;

    /// Take the in-flight marker for `(kind, key)` until `expires_at`.
    /// Returns false while another live claim holds it. An expired claim
    /// is taken over.
    async fn claim(&self, kind: CacheKind, key: &str, expires_at: DateTime<Utc>) -> Result<bool>;

    async fn release(&self, kind: CacheKind, key: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &SearchSession) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<SearchSession>>;

    /// Persist `session` if the stored copy still has `session.version`, then
    /// bump the version. Fails with `SessionConflict` on a stale write.
    async fn update(&self, session: &mut SearchSession) -> Result<()>;

    /// Active sessions, most recently accessed first.
    async fn list_active(&self, limit: usize) -> Result<Vec<SearchSession>>;

    /// Soft-delete. Returns false when no such session exists.
    async fn deactivate(&self, id: Uuid) -> Result<bool>;

    /// Soft-delete every active session. Returns how many were deactivated.
    async fn deactivate_all(&self) -> Result<u64>;

    /// Administrative hard delete of every session, active or not.
    async fn purge_all(&self) -> Result<u64>;
}
