// Apify-backed collectors: the profile search actor for discovery, and the
// profile/company collect actors for materialization.

use std::sync::Arc;

use apify_client::{ApifyClient, MAX_SEARCH_PAGES, SEARCH_PAGE_SIZE};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{PreviewCollector, RecordCollector, PREVIEW_RESULT_CAP};
use crate::error::Result;
use crate::keys::{CandidateKey, CompanyKey};
use crate::session::SearchQuery;

pub struct ApifyPreview {
    client: Arc<ApifyClient>,
    actor_id: String,
}

impl ApifyPreview {
    pub fn new(client: Arc<ApifyClient>, actor_id: impl Into<String>) -> Self {
        Self {
            client,
            actor_id: actor_id.into(),
        }
    }
}

#[async_trait]
impl PreviewCollector for ApifyPreview {
    async fn search(&self, query: &SearchQuery, companies: &[String]) -> Result<Vec<CandidateKey>> {
        let mut keys = Vec::new();
        let mut unkeyed = 0usize;

        for page in 1..=MAX_SEARCH_PAGES {
            let items = self
                .client
                .search_profiles(&self.actor_id, &query.0, companies, page)
                .await?;
            let page_len = items.len();

            for item in items {
                match CandidateKey::from_search_hit(item.id, item.profile_url.as_deref()) {
                    Some(key) => keys.push(key),
                    None => unkeyed += 1,
                }
            }

            if page_len < SEARCH_PAGE_SIZE as usize {
                break;
            }
        }

        if unkeyed > 0 {
            warn!(unkeyed, "Search hits without id or profile URL were skipped");
        }
        keys.truncate(PREVIEW_RESULT_CAP);
        info!(companies = companies.len(), found = keys.len(), "Preview search complete");
        Ok(keys)
    }
}

pub struct ApifyCollector {
    client: Arc<ApifyClient>,
    profile_actor: String,
    company_actor: String,
}

impl ApifyCollector {
    pub fn new(
        client: Arc<ApifyClient>,
        profile_actor: impl Into<String>,
        company_actor: impl Into<String>,
    ) -> Self {
        Self {
            client,
            profile_actor: profile_actor.into(),
            company_actor: company_actor.into(),
        }
    }
}

#[async_trait]
impl RecordCollector for ApifyCollector {
    async fn collect_profile(&self, key: &CandidateKey) -> Result<serde_json::Value> {
        Ok(self
            .client
            .collect_one(&self.profile_actor, &key.upstream_id())
            .await?)
    }

    async fn collect_company(&self, key: &CompanyKey) -> Result<serde_json::Value> {
        Ok(self
            .client
            .collect_one(&self.company_actor, key.upstream_id())
            .await?)
    }
}
