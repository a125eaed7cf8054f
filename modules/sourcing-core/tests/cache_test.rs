//! Freshness-tier behavior of the profile and company caches.
//! Runs against the in-memory store and the recording collector.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;
use sourcing_core::store::{CacheKind, CacheRecord, CacheStore, MemoryStore};
use sourcing_core::upstream::{MockCollector, MockFailure};
use sourcing_core::{CandidateKey, CompanyCache, CompanyKey, ProfileCache, SourcingError};

fn setup() -> (Arc<MemoryStore>, Arc<MockCollector>, ProfileCache, CompanyCache) {
    let store = Arc::new(MemoryStore::new());
    let collector = Arc::new(MockCollector::new());
    let profiles = ProfileCache::new(store.clone(), collector.clone());
    let companies = CompanyCache::new(store.clone(), collector.clone());
    (store, collector, profiles, companies)
}

async fn seed(store: &MemoryStore, kind: CacheKind, key: &str, age_days: i64) {
    let record = CacheRecord {
        kind,
        key: key.to_string(),
        payload: json!({ "seeded": true }),
        fetched_at: Utc::now() - Duration::days(age_days),
    };
    store.upsert(&record).await.unwrap();
}

// =========================================================================
// Profile tiers
// =========================================================================

#[tokio::test]
async fn fresh_profile_is_served_without_upstream_call() {
    let (store, collector, profiles, _) = setup();
    let key = CandidateKey::Id(42);
    seed(&store, CacheKind::Profile, &key.to_string(), 2).await;

    let resolved = profiles.resolve(&key).await.unwrap();

    assert!(resolved.hit);
    assert!(!resolved.stale);
    assert_eq!(resolved.payload["seeded"], true);
    assert!(collector.profile_calls().is_empty());
}

#[tokio::test]
async fn stale_profile_is_served_and_flagged() {
    let (store, collector, profiles, _) = setup();
    let key = CandidateKey::Id(42);
    seed(&store, CacheKind::Profile, &key.to_string(), 30).await;

    let resolved = profiles.resolve(&key).await.unwrap();

    assert!(resolved.hit);
    assert!(resolved.stale);
    assert!(collector.profile_calls().is_empty());
}

#[tokio::test]
async fn expired_profile_is_refetched_once() {
    let (store, collector, profiles, _) = setup();
    let key = CandidateKey::Id(42);
    seed(&store, CacheKind::Profile, &key.to_string(), 95).await;
    let before = Utc::now();

    let resolved = profiles.resolve(&key).await.unwrap();

    assert!(!resolved.hit);
    assert_eq!(collector.profile_calls(), vec![key.clone()]);
    assert!(resolved.fetched_at >= before);

    let stored = CacheStore::get(&*store, CacheKind::Profile, &key.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.fetched_at, resolved.fetched_at);
    assert_eq!(stored.payload["id"], "id:42");

    // Now fresh: a second resolution is a hit.
    let again = profiles.resolve(&key).await.unwrap();
    assert!(again.hit);
    assert_eq!(collector.profile_calls().len(), 1);
}

#[tokio::test]
async fn cold_miss_writes_exactly_one_record() {
    let (store, collector, profiles, _) = setup();
    let key = CandidateKey::Url("linkedin.com/in/jane-doe".into());

    let resolved = profiles.resolve(&key).await.unwrap();

    assert!(!resolved.hit);
    assert_eq!(collector.profile_calls().len(), 1);
    assert_eq!(store.cache_writes(), 1);
    assert_eq!(store.cache_len(CacheKind::Profile), 1);
}

#[tokio::test]
async fn failed_fetch_writes_nothing_and_retries_next_time() {
    let (store, collector, profiles, _) = setup();
    let key = CandidateKey::Id(7);
    collector.fail_profile(key.clone(), MockFailure::RateLimited);

    let err = profiles.resolve(&key).await.unwrap_err();
    assert!(matches!(err, SourcingError::UpstreamRateLimited(_)));
    assert_eq!(store.cache_writes(), 0);

    collector.clear_profile_failure(&key);
    let resolved = profiles.resolve(&key).await.unwrap();
    assert!(!resolved.hit);
    assert_eq!(collector.profile_calls().len(), 2);
    assert_eq!(store.cache_writes(), 1);
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let (store, collector, profiles, _) = setup();
    collector.set_delay(Some(StdDuration::from_millis(50)));
    let key = CandidateKey::Id(99);

    let (a, b) = tokio::join!(profiles.resolve(&key), profiles.resolve(&key));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(collector.profile_calls().len(), 1);
    assert_eq!(store.cache_writes(), 1);
    assert_eq!(a.payload, b.payload);
    // Exactly one of the two did the fetch.
    assert!(a.hit != b.hit);
}

#[tokio::test]
async fn separate_caches_on_one_store_share_one_fetch() {
    // Two caches over one store stand in for two processes on one database.
    let (store, collector, profiles, _) = setup();
    let other = ProfileCache::new(store.clone(), collector.clone());
    collector.set_delay(Some(StdDuration::from_millis(50)));
    let key = CandidateKey::Id(99);

    let (a, b) = tokio::join!(profiles.resolve(&key), other.resolve(&key));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(collector.profile_calls().len(), 1);
    assert_eq!(store.cache_writes(), 1);
    assert_eq!(a.payload, b.payload);
    assert!(a.hit != b.hit);
}

#[tokio::test]
async fn failed_fetch_releases_its_claim() {
    let (store, collector, profiles, _) = setup();
    let key = CandidateKey::Id(7);
    collector.fail_profile(key.clone(), MockFailure::Unavailable);
    profiles.resolve(&key).await.unwrap_err();

    // A second cache would wait on a leftover claim; it fetches straight away.
    let other = ProfileCache::new(store.clone(), collector.clone());
    collector.clear_profile_failure(&key);
    let resolved = tokio::time::timeout(StdDuration::from_millis(100), other.resolve(&key))
        .await
        .expect("claim should have been released")
        .unwrap();

    assert!(!resolved.hit);
    assert_eq!(collector.profile_calls().len(), 2);
}

// =========================================================================
// Company horizon
// =========================================================================

#[tokio::test]
async fn company_within_horizon_is_a_hit() {
    let (store, collector, _, companies) = setup();
    let key = CompanyKey::Id("1035".into());
    seed(&store, CacheKind::Company, &key.to_string(), 29).await;

    let resolved = companies.resolve(&key).await.unwrap();

    assert!(resolved.hit);
    assert!(!resolved.stale);
    assert!(collector.company_calls().is_empty());
}

#[tokio::test]
async fn company_past_horizon_is_refetched() {
    let (store, collector, _, companies) = setup();
    let key = CompanyKey::Id("1035".into());
    seed(&store, CacheKind::Company, &key.to_string(), 31).await;

    let resolved = companies.resolve(&key).await.unwrap();

    assert!(!resolved.hit);
    assert_eq!(collector.company_calls(), vec![key]);
    assert_eq!(resolved.payload["employee_count"], 120);
}

#[tokio::test]
async fn profile_and_company_keys_do_not_collide() {
    let (store, collector, profiles, companies) = setup();
    let profile = CandidateKey::Id(1035);
    let company = CompanyKey::Id("1035".into());
    seed(&store, CacheKind::Profile, &profile.to_string(), 1).await;

    let resolved = companies.resolve(&company).await.unwrap();
    assert!(!resolved.hit);
    assert_eq!(collector.company_calls().len(), 1);

    let resolved = profiles.resolve(&profile).await.unwrap();
    assert!(resolved.hit);
    assert!(collector.profile_calls().is_empty());
}
