//! Session lifecycle through the Sourcing facade: creation, batch advance,
//! listing, status and deactivation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sourcing_core::store::{MemoryStore, SessionStore};
use sourcing_core::upstream::{MockCollector, MockFailure, MockPreview};
use sourcing_core::{
    BatchAdvance, CandidateKey, LoaderConfig, SearchQuery, Sourcing, SourcingError,
};
use uuid::Uuid;

fn companies(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn ids(range: std::ops::Range<u64>) -> Vec<CandidateKey> {
    range.map(CandidateKey::Id).collect()
}

fn query() -> SearchQuery {
    SearchQuery(json!({ "title": "staff engineer", "location": "Berlin" }))
}

fn sourcing(preview: MockPreview) -> (Sourcing, Arc<MemoryStore>, Arc<MockPreview>) {
    let store = Arc::new(MemoryStore::new());
    let preview = Arc::new(preview);
    let sourcing = Sourcing::new(
        store.clone(),
        store.clone(),
        preview.clone(),
        Arc::new(MockCollector::new()),
        LoaderConfig::default(),
    );
    (sourcing, store, preview)
}

/// Seven companies, ids overlapping between A/F and B/G.
fn seven_company_preview() -> MockPreview {
    MockPreview::new()
        .with_company("A", ids(0..10))
        .with_company("B", ids(10..20))
        .with_company("C", ids(20..25))
        .with_company("F", ids(5..15))
        .with_company("G", ids(30..33))
}

const SEVEN: [&str; 7] = ["A", "B", "C", "D", "E", "F", "G"];

// =========================================================================
// Creation
// =========================================================================

#[tokio::test]
async fn create_splits_companies_and_runs_first_batch() {
    let (sourcing, store, preview) = sourcing(seven_company_preview());

    let created = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap();

    assert_eq!(created.total_batches, 2);
    assert_eq!(created.first_batch_result_count, 25);
    assert_eq!(preview.calls(), vec![companies(&["A", "B", "C", "D", "E"])]);

    let session = store.get(created.session_id).await.unwrap().unwrap();
    assert_eq!(session.batch_index, 0);
    assert_eq!(
        session.company_batches,
        vec![companies(&["A", "B", "C", "D", "E"]), companies(&["F", "G"])]
    );
    assert!(session.fetched_ids.is_empty());
    assert!(session.is_active);
}

#[tokio::test]
async fn create_uses_default_batch_size() {
    let (sourcing, _, _) = sourcing(seven_company_preview());
    let sourcing = sourcing.with_default_batch_size(3);

    let created = sourcing
        .create_session(query(), &companies(&SEVEN), None)
        .await
        .unwrap();

    assert_eq!(created.total_batches, 3);
}

#[tokio::test]
async fn create_rejects_empty_company_list() {
    let (sourcing, _, preview) = sourcing(MockPreview::new());

    let err = sourcing
        .create_session(query(), &[], Some(5))
        .await
        .unwrap_err();

    assert!(matches!(err, SourcingError::EmptyCompanyList));
    assert!(preview.calls().is_empty());
}

#[tokio::test]
async fn create_rejects_zero_batch_size() {
    let (sourcing, _, _) = sourcing(MockPreview::new());

    let err = sourcing
        .create_session(query(), &companies(&["A"]), Some(0))
        .await
        .unwrap_err();

    assert!(matches!(err, SourcingError::InvalidBatchConfig(_)));
}

#[tokio::test]
async fn create_with_no_results_still_persists_session() {
    let (sourcing, _, _) = sourcing(MockPreview::new());

    let created = sourcing
        .create_session(query(), &companies(&["Nobody"]), Some(5))
        .await
        .unwrap();
    assert_eq!(created.first_batch_result_count, 0);

    let status = sourcing.session_status(created.session_id).await.unwrap();
    assert_eq!(status.total_discovered, 0);
    assert!(!status.has_more_batches);
}

#[tokio::test]
async fn failed_first_search_creates_nothing() {
    let (sourcing, _, preview) = sourcing(seven_company_preview());
    preview.set_failure(Some(MockFailure::Unavailable));

    let err = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(sourcing.list_active_sessions(10).await.unwrap().is_empty());
}

// =========================================================================
// Batch advance
// =========================================================================

#[tokio::test]
async fn advance_merges_only_new_ids() {
    let (sourcing, store, _) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap();

    let BatchAdvance::Advanced(discovery) = sourcing.advance_batch(created.session_id).await.unwrap()
    else {
        panic!("expected a second batch");
    };

    assert_eq!(discovery.batch_index, 1);
    assert_eq!(discovery.companies, companies(&["F", "G"]));
    assert_eq!(discovery.returned, 13);
    // F's ids 5..15 were all seen in batch 0; only G's are new.
    assert_eq!(discovery.new_ids, ids(30..33));
    assert_eq!(discovery.total_discovered, 28);
    assert!(!discovery.has_more_batches);

    let session = store.get(created.session_id).await.unwrap().unwrap();
    assert_eq!(session.batch_index, 1);
    assert_eq!(session.discovered_ids.len(), 28);
}

#[tokio::test]
async fn advance_past_last_batch_changes_nothing() {
    let (sourcing, store, preview) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap();
    sourcing.advance_batch(created.session_id).await.unwrap();
    let before = store.get(created.session_id).await.unwrap().unwrap();

    let outcome = sourcing.advance_batch(created.session_id).await.unwrap();

    match outcome {
        BatchAdvance::NoMoreBatches {
            total_discovered,
            total_batches,
        } => {
            assert_eq!(total_discovered, 28);
            assert_eq!(total_batches, 2);
        }
        other => panic!("expected NoMoreBatches, got {other:?}"),
    }
    let after = store.get(created.session_id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(preview.calls().len(), 2);
}

#[tokio::test]
async fn failed_advance_can_be_rerun() {
    let (sourcing, store, preview) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap();

    preview.set_failure(Some(MockFailure::RateLimited));
    let err = sourcing.advance_batch(created.session_id).await.unwrap_err();
    assert!(matches!(err, SourcingError::UpstreamRateLimited(_)));
    let session = store.get(created.session_id).await.unwrap().unwrap();
    assert_eq!(session.batch_index, 0);

    preview.set_failure(None);
    let outcome = sourcing.advance_batch(created.session_id).await.unwrap();
    assert!(matches!(outcome, BatchAdvance::Advanced(_)));
}

#[tokio::test]
async fn advance_unknown_session_is_not_found() {
    let (sourcing, _, _) = sourcing(MockPreview::new());
    let id = Uuid::new_v4();

    let err = sourcing.advance_batch(id).await.unwrap_err();

    assert!(matches!(err, SourcingError::SessionNotFound(missing) if missing == id));
}

#[tokio::test]
async fn advance_inactive_session_is_rejected() {
    let (sourcing, _, _) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap();
    sourcing.deactivate_session(created.session_id).await.unwrap();

    let err = sourcing.advance_batch(created.session_id).await.unwrap_err();

    assert!(matches!(err, SourcingError::SessionInactive(_)));
}

// =========================================================================
// Listing, status, deactivation
// =========================================================================

#[tokio::test]
async fn list_orders_by_last_access_and_hides_inactive() {
    let (sourcing, _, _) = sourcing(seven_company_preview());
    let mut created = Vec::new();
    for _ in 0..3 {
        let c = sourcing
            .create_session(query(), &companies(&["A"]), Some(5))
            .await
            .unwrap();
        created.push(c.session_id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Reading the oldest moves it to the front.
    sourcing.session_status(created[0]).await.unwrap();
    sourcing.deactivate_session(created[1]).await.unwrap();

    let listed: Vec<Uuid> = sourcing
        .list_active_sessions(10)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(listed, vec![created[0], created[2]]);

    let limited = sourcing.list_active_sessions(1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn status_reports_summary_without_query() {
    let (sourcing, _, _) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&SEVEN), Some(5))
        .await
        .unwrap();

    let status = sourcing.session_status(created.session_id).await.unwrap();

    assert_eq!(status.session_id, created.session_id);
    assert_eq!(status.total_discovered, 25);
    assert_eq!(status.total_fetched, 0);
    assert_eq!(status.current_batch, 0);
    assert_eq!(status.total_batches, 2);
    assert!(status.has_more_batches);
    assert!(status.is_active);

    let rendered = serde_json::to_value(&status).unwrap();
    assert!(rendered.get("query").is_none());
}

#[tokio::test]
async fn status_of_inactive_session_is_still_readable() {
    let (sourcing, _, _) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&["A"]), Some(5))
        .await
        .unwrap();
    sourcing.deactivate_session(created.session_id).await.unwrap();

    let status = sourcing.session_status(created.session_id).await.unwrap();

    assert!(!status.is_active);
    assert_eq!(status.total_discovered, 10);
}

#[tokio::test]
async fn deactivate_is_idempotent() {
    let (sourcing, store, _) = sourcing(seven_company_preview());
    let created = sourcing
        .create_session(query(), &companies(&["A"]), Some(5))
        .await
        .unwrap();

    sourcing.deactivate_session(created.session_id).await.unwrap();
    sourcing.deactivate_session(created.session_id).await.unwrap();

    let session = store.get(created.session_id).await.unwrap().unwrap();
    assert!(!session.is_active);
    assert_eq!(session.discovered_ids.len(), 10);
}

#[tokio::test]
async fn deactivate_unknown_session_is_not_found() {
    let (sourcing, _, _) = sourcing(MockPreview::new());

    let err = sourcing.deactivate_session(Uuid::new_v4()).await.unwrap_err();

    assert!(matches!(err, SourcingError::SessionNotFound(_)));
}

#[tokio::test]
async fn deactivate_all_and_purge() {
    let (sourcing, store, _) = sourcing(seven_company_preview());
    let mut created = Vec::new();
    for _ in 0..3 {
        let c = sourcing
            .create_session(query(), &companies(&["A"]), Some(5))
            .await
            .unwrap();
        created.push(c.session_id);
    }
    sourcing.deactivate_session(created[0]).await.unwrap();

    assert_eq!(sourcing.deactivate_all_sessions().await.unwrap(), 2);
    assert!(sourcing.list_active_sessions(10).await.unwrap().is_empty());

    assert_eq!(sourcing.purge_all_sessions().await.unwrap(), 3);
    assert!(store.get(created[0]).await.unwrap().is_none());
}
