//! Incremental synchronization of mirrored issues.
//!
//! This module provides the core sync functionality:
//! - One-record synchronization driven by conditional fetch outcomes
//! - Crawl passes over scheduler-selected candidates (body and timeline)
//! - The shared upsert path used by crawl and webhook-style eager updates
//! - Sync logging for status display
//! - Scheduled background crawling at a configurable interval
//!
//! The engine holds no record state across calls. Each invocation reads the
//! current snapshot, reaches a definitive outcome, and applies the delta, so
//! an attempt abandoned mid-flight leaves the record exactly as stale as it
//! was.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::time;

use crate::error::SyncError;
use crate::models::issue::{Issue, IssueCreate};
use crate::models::organization::{self, Organization};
use crate::models::repository::{self, Repository};
use crate::services::crawl_scheduler::{CrawlDimension, CrawlScheduler};
use crate::services::github_client::{FetchOutcome, IssueFetch, RemoteIssue};
use crate::services::issue_store::IssueStore;

/// Default crawl interval in seconds (5 minutes).
pub const DEFAULT_CRAWL_INTERVAL_SECS: u64 = 300;

/// Maximum number of sync log entries to keep.
const MAX_LOG_ENTRIES: i64 = 50;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Result of synchronizing one record on one dimension.
///
/// A transient remote failure is the `Err` arm of the surrounding `Result`;
/// this enum only describes resolved attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cached copy is still current, or the resource is transiently
    /// absent. Freshness advanced, nothing else changed.
    Unchanged,

    /// A full representation was stored.
    Upserted,

    /// The remote permanently removed the resource; the record was
    /// soft-deleted and leaves the crawl population.
    SoftDeleted,
}

/// Outcome tally of one crawl pass.
#[derive(Debug, Default)]
pub struct CrawlSummary {
    /// Number of candidates the scheduler yielded.
    pub selected: i64,

    /// Records updated with a fresh payload.
    pub upserted: i64,

    /// Records confirmed current or transiently absent.
    pub unchanged: i64,

    /// Records soft-deleted on a Gone response.
    pub soft_deleted: i64,

    /// Per-record transient failures. The pass continues past these; the
    /// records stay due and resurface on the next pass.
    pub errors: Vec<String>,

    /// Duration of the pass in milliseconds.
    pub duration_ms: i64,
}

/// Sync log entry matching the sync_log table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncLogEntry {
    pub id: i64,
    pub operation: String,
    pub status: String,
    pub issue_id: Option<i64>,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

/// Synchronizes mirrored issues against the remote source of truth.
///
/// Dependencies are injected through the constructor; the engine itself is
/// stateless and safe to invoke concurrently for disjoint records. For the
/// same record, correctness relies on the store's upsert being atomic and
/// last-writer-wins per key.
pub struct SyncEngine<F: IssueFetch> {
    store: IssueStore,
    fetcher: F,
}

impl<F: IssueFetch> SyncEngine<F> {
    /// Create a new sync engine.
    pub fn new(store: IssueStore, fetcher: F) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &IssueStore {
        &self.store
    }

    /// Synchronize one issue's body against the remote.
    ///
    /// The stored validator makes the fetch conditional. Every resolved
    /// outcome advances `body_fetched_at` except Gone, where the record
    /// leaves the crawl population instead. A transient failure returns
    /// before any write, leaving the record as stale as it was.
    pub async fn sync_issue(
        &self,
        org: &Organization,
        repo: &Repository,
        issue: &Issue,
    ) -> Result<SyncOutcome, SyncError> {
        if org.installation_id.is_none() {
            return Err(SyncError::configuration(format!(
                "organization {} has no installation id",
                org.name
            )));
        }

        log::info!(
            "sync_issue: {}/{}#{} (etag cached: {})",
            org.name,
            repo.name,
            issue.number,
            issue.etag.is_some()
        );

        let outcome = self
            .fetcher
            .fetch_issue(&org.name, &repo.name, issue.number, issue.etag.as_deref())
            .await?;

        match outcome {
            FetchOutcome::Fresh { payload, etag } => {
                log::info!("sync_issue: cache miss for issue {}", issue.external_id);
                // The payload id wins over the pre-fetch snapshot: a remote
                // transfer reassigns the id, and the validator must land on
                // the row the upsert actually wrote.
                let external_id = payload.id;
                self.store_remote_issues(&[payload], org, repo).await?;
                self.store
                    .record_fresh_body(external_id, etag.as_deref(), now())
                    .await?;
                Ok(SyncOutcome::Upserted)
            }
            FetchOutcome::NotModified => {
                log::info!("sync_issue: cache hit for issue {}", issue.external_id);
                self.store.mark_body_fetched(issue.external_id, now()).await?;
                Ok(SyncOutcome::Unchanged)
            }
            FetchOutcome::NotFound => {
                // Transiently absent; mark as crawled so the scheduler makes
                // progress, but never delete for a 404.
                log::info!("sync_issue: 404 for issue {}, marking as crawled", issue.external_id);
                self.store.mark_body_fetched(issue.external_id, now()).await?;
                Ok(SyncOutcome::Unchanged)
            }
            FetchOutcome::Gone => {
                log::info!("sync_issue: 410 for issue {}, soft deleting", issue.external_id);
                self.store.soft_delete(issue.external_id, now()).await?;
                Ok(SyncOutcome::SoftDeleted)
            }
        }
    }

    /// Synchronize one issue's timeline events against the remote.
    ///
    /// Same outcome mapping as [`sync_issue`] on the independent timeline
    /// freshness dimension; a fresh response replaces the mirrored events
    /// wholesale.
    ///
    /// [`sync_issue`]: SyncEngine::sync_issue
    pub async fn sync_timeline(
        &self,
        org: &Organization,
        repo: &Repository,
        issue: &Issue,
    ) -> Result<SyncOutcome, SyncError> {
        if org.installation_id.is_none() {
            return Err(SyncError::configuration(format!(
                "organization {} has no installation id",
                org.name
            )));
        }

        let outcome = self
            .fetcher
            .fetch_timeline(&org.name, &repo.name, issue.number)
            .await?;

        match outcome {
            FetchOutcome::Fresh { payload, .. } => {
                self.store
                    .replace_timeline(issue.external_id, &payload, now())
                    .await?;
                Ok(SyncOutcome::Upserted)
            }
            FetchOutcome::NotModified | FetchOutcome::NotFound => {
                self.store
                    .mark_timeline_fetched(issue.external_id, now())
                    .await?;
                Ok(SyncOutcome::Unchanged)
            }
            FetchOutcome::Gone => {
                self.store.soft_delete(issue.external_id, now()).await?;
                Ok(SyncOutcome::SoftDeleted)
            }
        }
    }

    /// Normalize remote issues into the canonical shape and upsert them.
    ///
    /// This is the single entry point for every payload source: crawl
    /// fetches and webhook-style eager updates both land here, so the store
    /// only ever sees [`IssueCreate`]. Hook dispatch happens once per
    /// affected record after the batch commits.
    pub async fn store_remote_issues(
        &self,
        data: &[RemoteIssue],
        org: &Organization,
        repo: &Repository,
    ) -> Result<Vec<Issue>, SyncError> {
        let creates: Vec<IssueCreate> = data
            .iter()
            .map(|remote| IssueCreate::from_remote(remote, org.id, repo.id))
            .collect();

        self.store.upsert_many(&creates).await
    }

    /// Run one crawl pass over a dimension.
    ///
    /// Selects due candidates, synchronizes each, and keeps going past
    /// per-record transient failures: one bad record must never abort the
    /// pass. Failed records did not advance their freshness timestamp and
    /// resurface at the same priority next pass.
    pub async fn run_crawl_pass(
        &self,
        scheduler: &CrawlScheduler,
        dimension: CrawlDimension,
    ) -> Result<CrawlSummary, SyncError> {
        let start = Instant::now();
        let mut summary = CrawlSummary::default();

        let candidates = scheduler.select_candidates(dimension, now()).await?;
        summary.selected = candidates.len() as i64;

        for candidate in candidates {
            match self.sync_candidate(&candidate, dimension).await {
                Ok(SyncOutcome::Upserted) => summary.upserted += 1,
                Ok(SyncOutcome::Unchanged) => summary.unchanged += 1,
                Ok(SyncOutcome::SoftDeleted) => summary.soft_deleted += 1,
                Err(e) => {
                    log::warn!(
                        "crawl {}: issue {} failed: {}",
                        dimension.as_str(),
                        candidate.external_id,
                        e
                    );
                    summary
                        .errors
                        .push(format!("issue {}: {}", candidate.external_id, e));
                }
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as i64;

        self.log_sync_operation(
            &format!("crawl_{}", dimension.as_str()),
            if summary.errors.is_empty() { "success" } else { "error" },
            None,
            Some(format!(
                "selected {}, upserted {}, unchanged {}, soft-deleted {}, {} error(s)",
                summary.selected,
                summary.upserted,
                summary.unchanged,
                summary.soft_deleted,
                summary.errors.len()
            )),
            Some(summary.duration_ms),
        )
        .await?;

        Ok(summary)
    }

    /// Resolve a candidate's scopes and sync it on the given dimension.
    async fn sync_candidate(
        &self,
        candidate: &Issue,
        dimension: CrawlDimension,
    ) -> Result<SyncOutcome, SyncError> {
        let pool = self.store.pool();

        let org = organization::get_organization(pool, candidate.organization_id)
            .await?
            .ok_or_else(|| {
                SyncError::not_found_with_id("Organization", candidate.organization_id.to_string())
            })?;
        let repo = repository::get_repository(pool, candidate.repository_id)
            .await?
            .ok_or_else(|| {
                SyncError::not_found_with_id("Repository", candidate.repository_id.to_string())
            })?;

        match dimension {
            CrawlDimension::Body => self.sync_issue(&org, &repo, candidate).await,
            CrawlDimension::Timeline => self.sync_timeline(&org, &repo, candidate).await,
        }
    }

    /// Log a sync operation to the sync_log table.
    pub async fn log_sync_operation(
        &self,
        operation: &str,
        status: &str,
        issue_id: Option<i64>,
        message: Option<String>,
        duration_ms: Option<i64>,
    ) -> Result<(), SyncError> {
        let pool = self.store.pool();

        sqlx::query(
            r#"
            INSERT INTO sync_log (operation, status, issue_id, message, duration_ms, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(operation)
        .bind(status)
        .bind(issue_id)
        .bind(&message)
        .bind(duration_ms)
        .bind(now())
        .execute(pool)
        .await?;

        // Prune old log entries (keep only MAX_LOG_ENTRIES)
        sqlx::query(
            r#"
            DELETE FROM sync_log WHERE id NOT IN (
                SELECT id FROM sync_log ORDER BY timestamp DESC LIMIT ?
            )
            "#,
        )
        .bind(MAX_LOG_ENTRIES)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get recent sync log entries.
    pub async fn get_sync_log(&self, limit: i64) -> Result<Vec<SyncLogEntry>, SyncError> {
        let entries = sqlx::query_as::<_, SyncLogEntry>(
            "SELECT id, operation, status, issue_id, message, duration_ms, timestamp \
             FROM sync_log ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;

        Ok(entries)
    }
}

/// Background crawl configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Crawl interval in seconds.
    pub interval_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CRAWL_INTERVAL_SECS,
        }
    }
}

/// Commands that can be sent to the background crawler.
#[derive(Debug)]
pub enum SyncCommand {
    /// Trigger an immediate crawl pass on both dimensions.
    TriggerCrawl,

    /// Update the crawl configuration.
    UpdateConfig(CrawlConfig),

    /// Stop the background crawler.
    Stop,
}

/// Lightweight handle for controlling the background crawler.
///
/// Communicates with the background loop via an mpsc channel, avoiding lock
/// contention.
#[derive(Clone)]
pub struct CrawlHandle {
    command_tx: mpsc::Sender<SyncCommand>,

    /// Shared configuration (readable without locking the loop).
    config: Arc<RwLock<CrawlConfig>>,
}

impl CrawlHandle {
    /// Trigger an immediate crawl pass.
    pub async fn trigger_crawl(&self) -> Result<(), SyncError> {
        self.command_tx
            .send(SyncCommand::TriggerCrawl)
            .await
            .map_err(|_| SyncError::internal("Background crawler not running"))
    }

    /// Update the crawl configuration.
    pub async fn update_config(&self, config: CrawlConfig) -> Result<(), SyncError> {
        self.command_tx
            .send(SyncCommand::UpdateConfig(config))
            .await
            .map_err(|_| SyncError::internal("Background crawler not running"))
    }

    /// Stop the background crawler.
    pub async fn stop(&self) -> Result<(), SyncError> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| SyncError::internal("Background crawler not running"))
    }

    /// Get the current configuration.
    pub async fn get_config(&self) -> CrawlConfig {
        self.config.read().await.clone()
    }
}

impl<F: IssueFetch + Send + Sync + 'static> SyncEngine<F> {
    /// Start the background crawl loop.
    ///
    /// Spawns a task that owns the engine and runs both crawl dimensions at
    /// the configured interval. Returns a [`CrawlHandle`] for sending
    /// commands without holding a lock. Per-record failures never stop the
    /// loop; a pass simply reports them and the next tick retries.
    pub fn start_background(
        self,
        scheduler: CrawlScheduler,
        config: CrawlConfig,
    ) -> CrawlHandle {
        let (tx, mut rx) = mpsc::channel::<SyncCommand>(16);
        let config_shared = Arc::new(RwLock::new(config.clone()));
        let config_for_task = config_shared.clone();

        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(config.interval_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_both_dimensions(&scheduler).await;
                    }
                    Some(cmd) = rx.recv() => {
                        match cmd {
                            SyncCommand::TriggerCrawl => {
                                log::info!("manual crawl triggered");
                                self.run_both_dimensions(&scheduler).await;
                            }
                            SyncCommand::UpdateConfig(new_config) => {
                                log::info!("crawl config updated, interval={}s", new_config.interval_secs);
                                interval = time::interval(Duration::from_secs(new_config.interval_secs));
                                *config_for_task.write().await = new_config;
                            }
                            SyncCommand::Stop => {
                                log::info!("background crawler stopping");
                                break;
                            }
                        }
                    }
                }
            }
        });

        CrawlHandle {
            command_tx: tx,
            config: config_shared,
        }
    }

    async fn run_both_dimensions(&self, scheduler: &CrawlScheduler) {
        for dimension in [CrawlDimension::Body, CrawlDimension::Timeline] {
            match self.run_crawl_pass(scheduler, dimension).await {
                Ok(summary) => log::info!(
                    "crawl {} pass: {} selected, {} upserted, {} error(s) in {}ms",
                    dimension.as_str(),
                    summary.selected,
                    summary.upserted,
                    summary.errors.len(),
                    summary.duration_ms
                ),
                Err(e) => log::warn!("crawl {} pass failed: {}", dimension.as_str(), e),
            }
        }
    }
}
