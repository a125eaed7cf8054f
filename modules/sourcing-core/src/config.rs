use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::loader::LoaderConfig;
use crate::profile::CompanyFilter;
use crate::upstream::RetryPolicy;

/// Apify actors backing the three upstream services.
#[derive(Debug, Clone)]
pub struct ActorIds {
    pub profile_search: String,
    pub profile_collect: String,
    pub company_collect: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SourcingConfig {
    pub database_url: String,
    pub apify_api_key: String,
    pub actors: ActorIds,

    pub default_batch_size: usize,
    pub preview_min_interval: Duration,
    /// Retries, backoff and the per-call upstream timeout.
    pub retry: RetryPolicy,
    pub loader: LoaderConfig,
}

impl SourcingConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            apify_api_key: std::env::var("APIFY_API_KEY").context("APIFY_API_KEY must be set")?,
            actors: ActorIds {
                profile_search: env_or("PROFILE_SEARCH_ACTOR", "sourcing~profile-search".to_string())?,
                profile_collect: env_or("PROFILE_COLLECT_ACTOR", "sourcing~profile-collect".to_string())?,
                company_collect: env_or("COMPANY_COLLECT_ACTOR", "sourcing~company-collect".to_string())?,
            },
            default_batch_size: env_or("DEFAULT_BATCH_SIZE", 5)?,
            preview_min_interval: Duration::from_millis(env_or("PREVIEW_MIN_INTERVAL_MS", 3_000)?),
            retry: RetryPolicy {
                max_retries: env_or("UPSTREAM_MAX_RETRIES", 3)?,
                timeout: Duration::from_secs(env_or("UPSTREAM_TIMEOUT_SECS", 60)?),
                ..RetryPolicy::default()
            },
            loader: LoaderConfig {
                concurrency: env_or("FETCH_CONCURRENCY", 5)?,
                company_filter: CompanyFilter {
                    cutoff_year: env_or("COMPANY_CUTOFF_YEAR", 2020)?,
                    max_companies: env_or("MAX_COMPANIES_PER_PROFILE", 3)?,
                },
                claim_lease: Duration::from_secs(env_or("FETCH_CLAIM_LEASE_SECS", 900)?),
            },
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  APIFY_API_KEY: {}", preview(&self.apify_api_key));
        tracing::info!(
            search = %self.actors.profile_search,
            profile = %self.actors.profile_collect,
            company = %self.actors.company_collect,
            "  Actors"
        );
        tracing::info!(
            batch_size = self.default_batch_size,
            preview_interval_ms = self.preview_min_interval.as_millis() as u64,
            timeout_secs = self.retry.timeout.as_secs(),
            max_retries = self.retry.max_retries,
            concurrency = self.loader.concurrency,
            cutoff_year = self.loader.company_filter.cutoff_year,
            max_companies = self.loader.company_filter.max_companies,
            claim_lease_secs = self.loader.claim_lease.as_secs(),
            "  Limits"
        );
    }
}

/// First few characters of a secret, for confirming which key got loaded.
fn preview(val: &str) -> String {
    let shown: String = val.chars().take(5).collect();
    format!("{}...({} chars)", shown, val.chars().count())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_when_unset() {
        let value: u32 = env_or("SOURCING_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn preview_cuts_on_character_boundaries() {
        assert_eq!(preview("apify_api_abc"), "apify...(13 chars)");
        assert_eq!(preview("ключ-секрет"), "ключ-...(11 chars)");
        assert_eq!(preview("añ"), "añ...(2 chars)");
    }

    #[test]
    fn env_or_rejects_garbage() {
        std::env::set_var("SOURCING_TEST_BAD_NUMBER", "five");
        let result: Result<u32> = env_or("SOURCING_TEST_BAD_NUMBER", 5);
        assert!(result.is_err());
    }
}
