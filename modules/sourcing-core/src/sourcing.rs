// Sourcing: the public entry point for the caller-facing operations.
// Transport adapters (HTTP, CLI) hold one of these and translate results.

use std::sync::Arc;

use apify_client::ApifyClient;
use sqlx::PgPool;
use uuid::Uuid;

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::cache::{CompanyCache, ProfileCache};
use crate::config::SourcingConfig;
use crate::error::Result;
use crate::loader::{FetchNext, LoaderConfig, ProgressiveLoader};
use crate::manager::SessionManager;
use crate::session::{BatchAdvance, SearchQuery, SessionCreated, SessionSummary};
use crate::store::{CacheStore, PgStore, SessionStore};
use crate::upstream::{
    ApifyCollector, ApifyPreview, PreviewCollector, RateLimitedPreview, RecordCollector, Resilient,
};

pub struct Sourcing {
    manager: Arc<SessionManager>,
    loader: ProgressiveLoader,
    default_batch_size: usize,
}

impl Sourcing {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        cache: Arc<dyn CacheStore>,
        preview: Arc<dyn PreviewCollector>,
        collector: Arc<dyn RecordCollector>,
        loader_config: LoaderConfig,
    ) -> Self {
        let manager = Arc::new(
            SessionManager::new(sessions, preview).with_claim_lease(loader_config.claim_lease),
        );
        let loader = ProgressiveLoader::new(
            manager.clone(),
            ProfileCache::new(cache.clone(), collector.clone()),
            CompanyCache::new(cache, collector),
            loader_config,
        );

        Self {
            manager,
            loader,
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Production wiring: Postgres for both stores, Apify for all three
    /// upstream services, rate limiting on preview, retries everywhere.
    pub fn from_config(pool: PgPool, config: &SourcingConfig) -> Self {
        let store = Arc::new(PgStore::new(pool));
        let client = Arc::new(ApifyClient::new(config.apify_api_key.clone()));

        // Retries go through the limiter so every attempt is spaced.
        let preview = Resilient::new(
            RateLimitedPreview::new(
                ApifyPreview::new(client.clone(), config.actors.profile_search.clone()),
                config.preview_min_interval,
            ),
            config.retry,
        );
        let collector = Resilient::new(
            ApifyCollector::new(
                client,
                config.actors.profile_collect.clone(),
                config.actors.company_collect.clone(),
            ),
            config.retry,
        );

        Self::new(
            store.clone(),
            store,
            Arc::new(preview),
            Arc::new(collector),
            config.loader,
        )
        .with_default_batch_size(config.default_batch_size)
    }

    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Create a session; `batch_size` falls back to the configured default.
    pub async fn create_session(
        &self,
        query: SearchQuery,
        companies: &[String],
        batch_size: Option<usize>,
    ) -> Result<SessionCreated> {
        self.manager
            .create_session(query, companies, batch_size.unwrap_or(self.default_batch_size))
            .await
    }

    pub async fn advance_batch(&self, session_id: Uuid) -> Result<BatchAdvance> {
        self.manager.advance_batch(session_id).await
    }

    pub async fn fetch_next(&self, session_id: Uuid, batch_size: usize) -> Result<FetchNext> {
        self.loader.fetch_next(session_id, batch_size).await
    }

    pub async fn list_active_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.manager.list_active_sessions(limit).await
    }

    pub async fn session_status(&self, session_id: Uuid) -> Result<SessionSummary> {
        self.manager.session_status(session_id).await
    }

    pub async fn deactivate_session(&self, session_id: Uuid) -> Result<()> {
        self.manager.deactivate_session(session_id).await
    }

    pub async fn deactivate_all_sessions(&self) -> Result<u64> {
        self.manager.deactivate_all().await
    }

    pub async fn purge_all_sessions(&self) -> Result<u64> {
        self.manager.purge_all_sessions().await
    }
}
