// Recording collectors for tests. Configure canned results up front, then
// assert on the recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{PreviewCollector, RecordCollector, PREVIEW_RESULT_CAP};
use crate::error::{Result, SourcingError};
use crate::keys::{CandidateKey, CompanyKey};
use crate::session::SearchQuery;

/// How a mocked upstream call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    RateLimited,
    Unavailable,
    /// The platform refused the call itself, e.g. a missing actor.
    Rejected,
}

impl MockFailure {
    fn into_error(self, id: &str) -> SourcingError {
        match self {
            MockFailure::NotFound => SourcingError::UpstreamNotFound(id.to_string()),
            MockFailure::RateLimited => SourcingError::UpstreamRateLimited(id.to_string()),
            MockFailure::Unavailable => SourcingError::UpstreamUnavailable(id.to_string()),
            MockFailure::Rejected => SourcingError::UpstreamRejected(id.to_string()),
        }
    }
}

/// Preview collector returning the ids registered for each company, in the
/// order companies are queried.
#[derive(Default)]
pub struct MockPreview {
    by_company: Mutex<HashMap<String, Vec<CandidateKey>>>,
    failure: Mutex<Option<MockFailure>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(self, company: &str, ids: impl IntoIterator<Item = CandidateKey>) -> Self {
        self.by_company
            .lock()
            .unwrap()
            .insert(company.to_string(), ids.into_iter().collect());
        self
    }

    /// Make every subsequent search fail until cleared with `None`.
    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Sleep this long inside every search.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Company groups passed to each search, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PreviewCollector for MockPreview {
    async fn search(&self, _query: &SearchQuery, companies: &[String]) -> Result<Vec<CandidateKey>> {
        self.calls.lock().unwrap().push(companies.to_vec());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = *self.failure.lock().unwrap() {
            return Err(failure.into_error("preview"));
        }

        let by_company = self.by_company.lock().unwrap();
        let mut ids: Vec<CandidateKey> = companies
            .iter()
            .filter_map(|c| by_company.get(c))
            .flatten()
            .cloned()
            .collect();
        ids.truncate(PREVIEW_RESULT_CAP);
        Ok(ids)
    }
}

/// Collect API returning a synthetic payload for any key unless told
/// otherwise. Profiles list the companies registered via `with_experience`.
#[derive(Default)]
pub struct MockCollector {
    profiles: Mutex<HashMap<CandidateKey, serde_json::Value>>,
    profile_failures: Mutex<HashMap<CandidateKey, MockFailure>>,
    company_failures: Mutex<HashMap<CompanyKey, MockFailure>>,
    down: Mutex<Option<MockFailure>>,
    delay: Mutex<Option<Duration>>,
    profile_calls: Mutex<Vec<CandidateKey>>,
    company_calls: Mutex<Vec<CompanyKey>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, key: CandidateKey, payload: serde_json::Value) -> Self {
        self.profiles.lock().unwrap().insert(key, payload);
        self
    }

    pub fn fail_profile(&self, key: CandidateKey, failure: MockFailure) {
        self.profile_failures.lock().unwrap().insert(key, failure);
    }

    pub fn clear_profile_failure(&self, key: &CandidateKey) {
        self.profile_failures.lock().unwrap().remove(key);
    }

    pub fn fail_company(&self, key: CompanyKey, failure: MockFailure) {
        self.company_failures.lock().unwrap().insert(key, failure);
    }

    /// Fail every call, profile and company alike.
    pub fn set_down(&self, failure: Option<MockFailure>) {
        *self.down.lock().unwrap() = failure;
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn profile_calls(&self) -> Vec<CandidateKey> {
        self.profile_calls.lock().unwrap().clone()
    }

    pub fn company_calls(&self) -> Vec<CompanyKey> {
        self.company_calls.lock().unwrap().clone()
    }

    /// Most calls, profile and company together, that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RecordCollector for MockCollector {
    async fn collect_profile(&self, key: &CandidateKey) -> Result<serde_json::Value> {
        self.profile_calls.lock().unwrap().push(key.clone());
        let _call = self.enter();
        self.pause().await;

        let failure = (*self.down.lock().unwrap())
            .or_else(|| self.profile_failures.lock().unwrap().get(key).copied());
        if let Some(failure) = failure {
            return Err(failure.into_error(&key.to_string()));
        }

        let payload = self
            .profiles
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| json!({ "id": key.to_string(), "experience": [] }));
        Ok(payload)
    }

    async fn collect_company(&self, key: &CompanyKey) -> Result<serde_json::Value> {
        self.company_calls.lock().unwrap().push(key.clone());
        let _call = self.enter();
        self.pause().await;

        let failure = (*self.down.lock().unwrap())
            .or_else(|| self.company_failures.lock().unwrap().get(key).copied());
        if let Some(failure) = failure {
            return Err(failure.into_error(&key.to_string()));
        }

        Ok(json!({ "id": key.to_string(), "employee_count": 120 }))
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
