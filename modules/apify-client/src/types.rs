use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

// --- Profile search (preview) actor ---

/// Input for the profile search actor. `filters` is passed through untouched;
/// the actor owns its schema.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSearchInput {
    pub filters: serde_json::Value,
    #[serde(rename = "companyNames")]
    pub company_names: Vec<String>,
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
}

/// One lightweight hit from the profile search actor. Depending on the
/// upstream index a hit carries a numeric id, a public profile URL, or both.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSearchItem {
    pub id: Option<u64>,
    #[serde(rename = "profileUrl")]
    pub profile_url: Option<String>,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
}

// --- Collect actors ---

/// Input for the profile and company collect actors: a single id per run so
/// each call maps to one metered unit.
#[derive(Debug, Clone, Serialize)]
pub struct CollectInput {
    pub ids: Vec<String>,
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}
