//! End-to-end crawl workflow verification.
//!
//! Drives the full stack (SQLite store, scheduler, sync engine) through a
//! record's lifecycle using a scripted fetcher:
//! - Webhook-style eager upsert creates the record
//! - First crawl fetches a fresh body and stores the validator
//! - A later crawl gets a cache hit and only advances freshness
//! - A transient failure leaves the record due for the next pass
//! - A Gone response soft-deletes and removes it from the crawl population
//!
//! Hook dispatch is observed on the post-commit channel throughout.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use tokio::sync::mpsc;

use issue_mirror::db;
use issue_mirror::error::SyncError;
use issue_mirror::models::organization::{self, create_organization};
use issue_mirror::models::repository::{self, create_repository};
use issue_mirror::models::{issue, Organization, Repository};
use issue_mirror::services::{
    CrawlDimension, CrawlScheduler, FetchOutcome, IssueEvent, IssueFetch, IssueStore, RemoteIssue,
    SyncEngine, SyncOutcome,
};

/// Fetcher that replays scripted outcomes, keyed by issue number.
#[derive(Clone, Default)]
struct ScriptedFetcher {
    body: Arc<Mutex<HashMap<i64, VecDeque<Result<FetchOutcome<RemoteIssue>, SyncError>>>>>,
    timeline:
        Arc<Mutex<HashMap<i64, VecDeque<Result<FetchOutcome<Vec<serde_json::Value>>, SyncError>>>>>,
}

impl ScriptedFetcher {
    fn push_body(&self, number: i64, outcome: Result<FetchOutcome<RemoteIssue>, SyncError>) {
        self.body
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push_back(outcome);
    }

    fn push_timeline(
        &self,
        number: i64,
        outcome: Result<FetchOutcome<Vec<serde_json::Value>>, SyncError>,
    ) {
        self.timeline
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push_back(outcome);
    }
}

impl IssueFetch for ScriptedFetcher {
    async fn fetch_issue(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
        _etag: Option<&str>,
    ) -> Result<FetchOutcome<RemoteIssue>, SyncError> {
        self.body
            .lock()
            .unwrap()
            .get_mut(&number)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(FetchOutcome::NotModified))
    }

    async fn fetch_timeline(
        &self,
        _owner: &str,
        _repo: &str,
        number: i64,
    ) -> Result<FetchOutcome<Vec<serde_json::Value>>, SyncError> {
        self.timeline
            .lock()
            .unwrap()
            .get_mut(&number)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(FetchOutcome::NotModified))
    }
}

fn remote_issue(external_id: i64, title: &str) -> RemoteIssue {
    RemoteIssue {
        id: external_id,
        number: external_id,
        title: title.to_string(),
        state: "open".to_string(),
        body: Some("reported via webhook".to_string()),
        html_url: format!("https://example.com/acme/widgets/issues/{}", external_id),
        created_at: "2026-01-15T10:30:00Z".to_string(),
        updated_at: Some("2026-02-01T08:00:00Z".to_string()),
        closed_at: None,
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct Harness {
    _dir: tempfile::TempDir,
    pool: sqlx::SqlitePool,
    engine: SyncEngine<ScriptedFetcher>,
    fetcher: ScriptedFetcher,
    scheduler: CrawlScheduler,
    hook_rx: mpsc::UnboundedReceiver<IssueEvent>,
    org: Organization,
    repo: Repository,
}

async fn setup() -> Harness {
    let dir = tempdir().unwrap();
    let pool = db::initialize(&dir.path().join("mirror.db")).await.unwrap();

    let org_id = create_organization(&pool, "acme", Some(7)).await.unwrap();
    let repo_id = create_repository(&pool, org_id, "widgets").await.unwrap();

    let (hook_tx, hook_rx) = mpsc::unbounded_channel();
    let store = IssueStore::with_hook_channel(pool.clone(), hook_tx);
    let fetcher = ScriptedFetcher::default();
    let engine = SyncEngine::new(store, fetcher.clone());
    let scheduler = CrawlScheduler::new(pool.clone());

    let org = organization::get_organization(&pool, org_id)
        .await
        .unwrap()
        .unwrap();
    let repo = repository::get_repository(&pool, repo_id)
        .await
        .unwrap()
        .unwrap();

    Harness {
        _dir: dir,
        pool,
        engine,
        fetcher,
        scheduler,
        hook_rx,
        org,
        repo,
    }
}

#[tokio::test]
async fn full_record_lifecycle() {
    let mut h = setup().await;

    // --- Webhook-style eager upsert creates the record ---
    let stored = h
        .engine
        .store_remote_issues(&[remote_issue(9001, "initial report")], &h.org, &h.repo)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].external_id, 9001);
    assert!(stored[0].body_fetched_at.is_none());

    // Exactly one hook event, after commit
    match h.hook_rx.try_recv().unwrap() {
        IssueEvent::Upserted(record) => assert_eq!(record.title, "initial report"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(h.hook_rx.try_recv().is_err());

    // An empty eager batch is a reported no-op: no error, no hooks
    let empty = h
        .engine
        .store_remote_issues(&[], &h.org, &h.repo)
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert!(h.hook_rx.try_recv().is_err());

    // --- Never-synced record is first in line for the body crawl ---
    let candidates = h
        .scheduler
        .select_candidates(CrawlDimension::Body, now())
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    let candidate = candidates.into_iter().next().unwrap();

    // --- First crawl: fresh body, validator stored ---
    h.fetcher.push_body(
        9001,
        Ok(FetchOutcome::Fresh {
            payload: remote_issue(9001, "triaged report"),
            etag: Some("\"etag-v1\"".to_string()),
        }),
    );
    let outcome = h.engine.sync_issue(&h.org, &h.repo, &candidate).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Upserted);

    let record = issue::get_by_external_id(&h.pool, 9001).await.unwrap().unwrap();
    assert_eq!(record.title, "triaged report");
    assert_eq!(record.etag.as_deref(), Some("\"etag-v1\""));
    let first_fetch = record.body_fetched_at.unwrap();

    match h.hook_rx.try_recv().unwrap() {
        IssueEvent::Upserted(r) => assert_eq!(r.external_id, 9001),
        other => panic!("unexpected event: {:?}", other),
    }

    // --- Freshly synced record is no longer due ---
    let candidates = h
        .scheduler
        .select_candidates(CrawlDimension::Body, now())
        .await
        .unwrap();
    assert!(candidates.is_empty());

    // --- Cache hit: validator kept, freshness advanced, no hook ---
    h.fetcher.push_body(9001, Ok(FetchOutcome::NotModified));
    let outcome = h.engine.sync_issue(&h.org, &h.repo, &record).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);

    let record = issue::get_by_external_id(&h.pool, 9001).await.unwrap().unwrap();
    assert_eq!(record.etag.as_deref(), Some("\"etag-v1\""));
    assert!(record.body_fetched_at.unwrap() >= first_fetch);
    assert!(h.hook_rx.try_recv().is_err());

    // --- Transient failure: nothing moves ---
    h.fetcher
        .push_body(9001, Err(SyncError::remote_api_full("upstream 503", 503, "/x")));
    let err = h.engine.sync_issue(&h.org, &h.repo, &record).await.unwrap_err();
    assert!(err.is_transient());

    let unchanged = issue::get_by_external_id(&h.pool, 9001).await.unwrap().unwrap();
    assert_eq!(unchanged.body_fetched_at, record.body_fetched_at);
    assert_eq!(unchanged.etag, record.etag);

    // --- Gone: soft delete, hook event, out of the crawl population ---
    h.fetcher.push_body(9001, Ok(FetchOutcome::Gone));
    let outcome = h.engine.sync_issue(&h.org, &h.repo, &record).await.unwrap();
    assert_eq!(outcome, SyncOutcome::SoftDeleted);

    let deleted = issue::get_by_external_id(&h.pool, 9001).await.unwrap().unwrap();
    assert!(deleted.deleted_at.is_some());

    match h.hook_rx.try_recv().unwrap() {
        IssueEvent::SoftDeleted(r) => assert_eq!(r.external_id, 9001),
        other => panic!("unexpected event: {:?}", other),
    }

    for dimension in [CrawlDimension::Body, CrawlDimension::Timeline] {
        let candidates = h.scheduler.select_candidates(dimension, now()).await.unwrap();
        assert!(candidates.is_empty(), "{:?}", dimension);
    }
}

#[tokio::test]
async fn crawl_pass_over_mixed_population() {
    let h = setup().await;

    // Three records: one fails transiently, one refreshes, one is gone
    h.engine
        .store_remote_issues(
            &[
                remote_issue(1, "flaky"),
                remote_issue(2, "healthy"),
                remote_issue(3, "removed upstream"),
            ],
            &h.org,
            &h.repo,
        )
        .await
        .unwrap();

    h.fetcher.push_body(1, Err(SyncError::network("connection reset")));
    h.fetcher.push_body(
        2,
        Ok(FetchOutcome::Fresh {
            payload: remote_issue(2, "healthy, updated"),
            etag: Some("\"h2\"".to_string()),
        }),
    );
    h.fetcher.push_body(3, Ok(FetchOutcome::Gone));

    let summary = h
        .engine
        .run_crawl_pass(&h.scheduler, CrawlDimension::Body)
        .await
        .unwrap();

    assert_eq!(summary.selected, 3);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.upserted, 1);
    assert_eq!(summary.soft_deleted, 1);
    assert_eq!(summary.unchanged, 0);

    // Only the transiently failed record is still due
    let candidates = h
        .scheduler
        .select_candidates(CrawlDimension::Body, now())
        .await
        .unwrap();
    let ids: Vec<i64> = candidates.iter().map(|i| i.external_id).collect();
    assert_eq!(ids, vec![1]);

    // And the gone record is really gone from the live set
    assert_eq!(issue::count_live(&h.pool).await.unwrap(), 2);
}

#[tokio::test]
async fn timeline_dimension_is_independent() {
    let h = setup().await;

    h.engine
        .store_remote_issues(&[remote_issue(1, "one")], &h.org, &h.repo)
        .await
        .unwrap();

    h.fetcher.push_timeline(
        1,
        Ok(FetchOutcome::Fresh {
            payload: vec![serde_json::json!({"event": "commented"})],
            etag: None,
        }),
    );

    // Sync the timeline only
    let candidates = h
        .scheduler
        .select_candidates(CrawlDimension::Timeline, now())
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    let outcome = h
        .engine
        .sync_timeline(&h.org, &h.repo, &candidates[0])
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Upserted);

    let record = issue::get_by_external_id(&h.pool, 1).await.unwrap().unwrap();
    assert!(record.timeline.unwrap().contains("commented"));

    // Timeline no longer due, body still never-synced and due
    let timeline = h
        .scheduler
        .select_candidates(CrawlDimension::Timeline, now())
        .await
        .unwrap();
    assert!(timeline.is_empty());

    let body = h
        .scheduler
        .select_candidates(CrawlDimension::Body, now())
        .await
        .unwrap();
    assert_eq!(body.len(), 1);
}

#[tokio::test]
async fn concurrent_syncs_of_disjoint_records() {
    let h = setup().await;

    h.engine
        .store_remote_issues(
            &[remote_issue(1, "a"), remote_issue(2, "b")],
            &h.org,
            &h.repo,
        )
        .await
        .unwrap();

    for n in [1, 2] {
        h.fetcher.push_body(
            n,
            Ok(FetchOutcome::Fresh {
                payload: remote_issue(n, "synced"),
                etag: Some(format!("\"v{}\"", n)),
            }),
        );
    }

    let candidates = h
        .scheduler
        .select_candidates(CrawlDimension::Body, now())
        .await
        .unwrap();
    assert_eq!(candidates.len(), 2);

    // Both records synced concurrently against the shared pool
    let (a, b) = tokio::join!(
        h.engine.sync_issue(&h.org, &h.repo, &candidates[0]),
        h.engine.sync_issue(&h.org, &h.repo, &candidates[1]),
    );
    assert_eq!(a.unwrap(), SyncOutcome::Upserted);
    assert_eq!(b.unwrap(), SyncOutcome::Upserted);

    let candidates = h
        .scheduler
        .select_candidates(CrawlDimension::Body, now())
        .await
        .unwrap();
    assert!(candidates.is_empty());
}
