use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CacheKind, CacheRecord, CacheStore, SessionStore};
use crate::error::{Result, SourcingError};
use crate::session::SearchSession;

/// Process-local store implementing both traits. Nothing survives a restart;
/// used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, SearchSession>>,
    cache: Mutex<HashMap<(CacheKind, String), CacheRecord>>,
    cache_writes: Mutex<usize>,
    claims: Mutex<HashMap<(CacheKind, String), DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache upserts so far.
    pub fn cache_writes(&self) -> usize {
        *self.cache_writes.lock().unwrap()
    }

    /// Number of cached records of `kind`.
    pub fn cache_len(&self, kind: CacheKind) -> usize {
        self.cache
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheRecord>> {
        Ok(self
            .cache
            .lock()
            .unwrap()
            .get(&(kind, key.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: &CacheRecord) -> Result<()> {
        self.cache
            .lock()
            .unwrap()
            .insert((record.kind, record.key.clone()), record.clone());
        *self.cache_writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn claim(&self, kind: CacheKind, key: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let mut claims = self.claims.lock().unwrap();
        let slot = (kind, key.to_string());
        match claims.get(&slot) {
            Some(held_until) if *held_until > Utc::now() => Ok(false),
            _ => {
                claims.insert(slot, expires_at);
                Ok(true)
            }
        }
    }

    async fn release(&self, kind: CacheKind, key: &str) -> Result<()> {
        self.claims.lock().unwrap().remove(&(kind, key.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: &SearchSession) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SearchSession>> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, session: &mut SearchSession) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let stored = sessions
            .get_mut(&session.id)
            .ok_or(SourcingError::SessionNotFound(session.id))?;
        if stored.version != session.version {
            return Err(SourcingError::SessionConflict(session.id));
        }
        session.version += 1;
        *stored = session.clone();
        Ok(())
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<SearchSession>> {
        let mut active: Vec<SearchSession> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        active.truncate(limit);
        Ok(active)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(&id) else {
            return Ok(false);
        };
        if session.is_active {
            session.is_active = false;
            session.version += 1;
        }
        session.last_accessed = Utc::now();
        Ok(true)
    }

    async fn deactivate_all(&self) -> Result<u64> {
        let now = Utc::now();
        let mut count = 0;
        for session in self.sessions.lock().unwrap().values_mut() {
            if session.is_active {
                session.is_active = false;
                session.version += 1;
                session.last_accessed = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_all(&self) -> Result<u64> {
        let mut sessions = self.sessions.lock().unwrap();
        let count = sessions.len() as u64;
        sessions.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SearchQuery;

    fn session() -> SearchSession {
        SearchSession::new(SearchQuery(serde_json::json!({})), vec![vec!["Acme".into()]])
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let store = MemoryStore::new();
        let original = session();
        store.insert(&original).await.unwrap();

        let mut first = original.clone();
        store.update(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        let mut stale = original;
        let err = store.update(&mut stale).await.unwrap_err();
        assert!(matches!(err, SourcingError::SessionConflict(_)));
    }

    #[tokio::test]
    async fn cache_claims_are_exclusive_until_released_or_expired() {
        let store = MemoryStore::new();
        let until = Utc::now() + chrono::Duration::minutes(5);

        assert!(store.claim(CacheKind::Profile, "id:1", until).await.unwrap());
        assert!(!store.claim(CacheKind::Profile, "id:1", until).await.unwrap());
        assert!(store.claim(CacheKind::Company, "id:1", until).await.unwrap());

        store.release(CacheKind::Profile, "id:1").await.unwrap();
        assert!(store.claim(CacheKind::Profile, "id:1", until).await.unwrap());

        let lapsed = Utc::now() - chrono::Duration::seconds(1);
        assert!(store.claim(CacheKind::Profile, "id:2", lapsed).await.unwrap());
        assert!(store.claim(CacheKind::Profile, "id:2", until).await.unwrap());
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let store = MemoryStore::new();
        let s = session();
        store.insert(&s).await.unwrap();

        assert!(store.deactivate(s.id).await.unwrap());
        assert!(store.deactivate(s.id).await.unwrap());
        assert!(!store.deactivate(Uuid::new_v4()).await.unwrap());
        assert!(store.list_active(10).await.unwrap().is_empty());
        assert!(SessionStore::get(&store, s.id).await.unwrap().is_some());
    }
}
