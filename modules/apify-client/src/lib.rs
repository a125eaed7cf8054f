pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{CollectInput, ProfileSearchInput, ProfileSearchItem, RunData};

use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Results per search page. The search actor serves at most `MAX_SEARCH_PAGES`
/// pages of this size for any single query.
pub const SEARCH_PAGE_SIZE: u32 = 20;
pub const MAX_SEARCH_PAGES: u32 = 5;

/// Upper bound on `waitForFinish=60` long-polls before a run is given up on.
const MAX_WAIT_POLLS: u32 = 10;

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize>(&self, actor_id: &str, input: &I) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let resp = check_status(resp, actor_id).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run completes. Uses `waitForFinish=60` for efficient long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        for poll in 0..MAX_WAIT_POLLS {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let resp = check_status(resp, run_id).await?;
            let api_resp: ApiResponse<RunData> = resp.json().await?;
            match api_resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(api_resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed(api_resp.data.status));
                }
                _ => {
                    tracing::debug!(run_id, poll, status = %api_resp.data.status, "Run still in progress");
                }
            }
        }
        Err(ApifyError::RunFailed("TIMED-OUT".to_string()))
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let resp = check_status(resp, dataset_id).await?;
        let items: Vec<T> = resp.json().await?;
        Ok(items)
    }

    /// Run an actor end-to-end: start run, poll, fetch results.
    pub async fn run_actor<I: Serialize, T: DeserializeOwned>(
        &self,
        actor_id: &str,
        input: &I,
    ) -> Result<Vec<T>> {
        let run = self.start_run(actor_id, input).await?;
        tracing::debug!(actor_id, run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::debug!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed, fetching results"
        );

        self.get_dataset_items(&completed.default_dataset_id).await
    }

    /// Fetch one page of lightweight search hits. Pages are 1-based; pages past
    /// `MAX_SEARCH_PAGES` are refused locally because the actor rejects them.
    pub async fn search_profiles(
        &self,
        actor_id: &str,
        filters: &serde_json::Value,
        company_names: &[String],
        page: u32,
    ) -> Result<Vec<ProfileSearchItem>> {
        if page == 0 || page > MAX_SEARCH_PAGES {
            return Err(ApifyError::PageLimit {
                page,
                max: MAX_SEARCH_PAGES,
            });
        }

        tracing::info!(companies = company_names.len(), page, "Searching profiles");

        let input = ProfileSearchInput {
            filters: filters.clone(),
            company_names: company_names.to_vec(),
            page,
            page_size: SEARCH_PAGE_SIZE,
        };
        let mut items: Vec<ProfileSearchItem> = self.run_actor(actor_id, &input).await?;
        items.truncate(SEARCH_PAGE_SIZE as usize);

        tracing::info!(count = items.len(), page, "Fetched search page");
        Ok(items)
    }

    /// Collect one full record by id. Each call is one metered unit.
    pub async fn collect_one(&self, actor_id: &str, id: &str) -> Result<serde_json::Value> {
        tracing::info!(actor_id, id, "Collecting record");

        let input = CollectInput {
            ids: vec![id.to_string()],
        };
        let items: Vec<serde_json::Value> = self.run_actor(actor_id, &input).await?;

        items
            .into_iter()
            .find(|item| !item.is_null())
            .ok_or_else(|| ApifyError::NotFound(id.to_string()))
    }
}

/// Map non-success responses onto the error kinds callers branch on.
async fn check_status(resp: reqwest::Response, target: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status.as_u16(), target, body))
}

/// A 404 here means the actor, run or dataset is missing, which is a
/// platform problem rather than a missing record. `NotFound` is reserved for
/// a collect run that finished without the record.
fn status_error(status: u16, target: &str, body: String) -> ApifyError {
    match status {
        429 => ApifyError::RateLimited(body),
        404 => ApifyError::Api {
            status,
            message: format!("{target} not found: {body}"),
        },
        code => ApifyError::Api {
            status: code,
            message: body,
        },
    }
}
