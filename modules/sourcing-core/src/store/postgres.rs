// Postgres persistence for sessions and cache records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{CacheKind, CacheRecord, CacheStore, SessionStore};
use crate::error::{Result, SourcingError};
use crate::session::{SearchQuery, SearchSession};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// A row from the search_sessions table.
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    query: serde_json::Value,
    company_batches: serde_json::Value,
    batch_index: i32,
    discovered_ids: serde_json::Value,
    fetched_ids: serde_json::Value,
    fetch_claims: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SessionRow> for SearchSession {
    type Error = SourcingError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(SearchSession {
            id: row.id,
            query: SearchQuery(row.query),
            company_batches: serde_json::from_value(row.company_batches)?,
            batch_index: row.batch_index.max(0) as usize,
            discovered_ids: serde_json::from_value(row.discovered_ids)?,
            fetched_ids: serde_json::from_value(row.fetched_ids)?,
            fetch_claims: serde_json::from_value(row.fetch_claims)?,
            is_active: row.is_active,
            created_at: row.created_at,
            last_accessed: row.last_accessed,
            version: row.version,
        })
    }
}

/// A row from the cache_records table.
#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    key: String,
    payload: serde_json::Value,
    fetched_at: DateTime<Utc>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SourcingError::Database(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheRecord>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT key, payload, fetched_at FROM cache_records
            WHERE kind = $1 AND key = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CacheRecord {
            kind,
            key: r.key,
            payload: r.payload,
            fetched_at: r.fetched_at,
        }))
    }

    async fn upsert(&self, record: &CacheRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_records (kind, key, payload, fetched_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (kind, key) DO UPDATE
                SET payload = EXCLUDED.payload,
                    fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.key)
        .bind(&record.payload)
        .bind(record.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim(&self, kind: CacheKind, key: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        // Inserts a fresh marker, or takes over one whose lease has run out.
        let result = sqlx::query(
            r#"
            INSERT INTO cache_claims (kind, key, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, key) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE cache_claims.expires_at <= now()
            "#,
        )
        .bind(kind.as_str())
        .bind(key)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, kind: CacheKind, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_claims WHERE kind = $1 AND key = $2")
            .bind(kind.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert(&self, s: &SearchSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO search_sessions
                (id, query, company_batches, batch_index, discovered_ids, fetched_ids,
                 fetch_claims, is_active, created_at, last_accessed, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(s.id)
        .bind(&s.query.0)
        .bind(serde_json::to_value(&s.company_batches)?)
        .bind(s.batch_index as i32)
        .bind(serde_json::to_value(&s.discovered_ids)?)
        .bind(serde_json::to_value(&s.fetched_ids)?)
        .bind(serde_json::to_value(&s.fetch_claims)?)
        .bind(s.is_active)
        .bind(s.created_at)
        .bind(s.last_accessed)
        .bind(s.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SearchSession>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM search_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SearchSession::try_from).transpose()
    }

    async fn update(&self, s: &mut SearchSession) -> Result<()> {
        // The query is never rewritten; only progress columns change.
        let result = sqlx::query(
            r#"
            UPDATE search_sessions
            SET batch_index = $3,
                discovered_ids = $4,
                fetched_ids = $5,
                fetch_claims = $6,
                is_active = $7,
                last_accessed = $8,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(s.id)
        .bind(s.version)
        .bind(s.batch_index as i32)
        .bind(serde_json::to_value(&s.discovered_ids)?)
        .bind(serde_json::to_value(&s.fetched_ids)?)
        .bind(serde_json::to_value(&s.fetch_claims)?)
        .bind(s.is_active)
        .bind(s.last_accessed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM search_sessions WHERE id = $1)",
            )
            .bind(s.id)
            .fetch_one(&self.pool)
            .await?;
            return Err(if exists {
                SourcingError::SessionConflict(s.id)
            } else {
                SourcingError::SessionNotFound(s.id)
            });
        }

        s.version += 1;
        Ok(())
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<SearchSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM search_sessions
            WHERE is_active
            ORDER BY last_accessed DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SearchSession::try_from).collect()
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_sessions
            SET is_active = FALSE,
                last_accessed = now(),
                version = CASE WHEN is_active THEN version + 1 ELSE version END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_all(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE search_sessions
            SET is_active = FALSE, last_accessed = now(), version = version + 1
            WHERE is_active
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM search_sessions")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
