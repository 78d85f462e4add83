//! Durable issue storage keyed by the remote-assigned identifier.
//!
//! All writes go through here. Upserts are batched in a single transaction
//! and downstream hooks (badge logic, notifications) are dispatched on a
//! channel only after the whole batch commits, one event per affected
//! record. A failed batch write dispatches nothing.

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::issue::{self, Issue, IssueCreate};

/// Post-commit event delivered to downstream hook consumers.
#[derive(Debug, Clone)]
pub enum IssueEvent {
    /// The record was inserted or replaced with remote state.
    Upserted(Issue),

    /// The record was marked deleted. Whether previously embedded side
    /// effects (badges) must be retracted is the consumer's decision.
    SoftDeleted(Issue),
}

/// Issue store with optional post-commit hook dispatch.
#[derive(Clone)]
pub struct IssueStore {
    pool: DbPool,
    hook_tx: Option<mpsc::UnboundedSender<IssueEvent>>,
}

impl IssueStore {
    /// Create a store without hook dispatch.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            hook_tx: None,
        }
    }

    /// Create a store that sends an event per affected record after each
    /// successful batch commit.
    pub fn with_hook_channel(pool: DbPool, hook_tx: mpsc::UnboundedSender<IssueEvent>) -> Self {
        Self {
            pool,
            hook_tx: Some(hook_tx),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Insert-or-replace a batch of issues keyed by `external_id`.
    ///
    /// Remote fields always win over locally held values. The owning scope
    /// columns are immutable after creation and never touched on conflict.
    ///
    /// An empty input is a reported no-op: it logs, returns an empty vec and
    /// dispatches no hooks. Duplicate external ids within one batch produce a
    /// single hook event for the last-written state.
    pub async fn upsert_many(&self, inserts: &[IssueCreate]) -> Result<Vec<Issue>, SyncError> {
        if inserts.is_empty() {
            log::warn!("upsert_many called with no issues to store");
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        for insert in inserts {
            sqlx::query(
                r#"
                INSERT INTO issues (
                    external_id, organization_id, repository_id, number, title, state,
                    body, html_url, issue_created_at, issue_updated_at, issue_closed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(external_id) DO UPDATE SET
                    number = excluded.number,
                    title = excluded.title,
                    state = excluded.state,
                    body = excluded.body,
                    html_url = excluded.html_url,
                    issue_updated_at = excluded.issue_updated_at,
                    issue_closed_at = excluded.issue_closed_at
                "#,
            )
            .bind(insert.external_id)
            .bind(insert.organization_id)
            .bind(insert.repository_id)
            .bind(insert.number)
            .bind(&insert.title)
            .bind(&insert.state)
            .bind(&insert.body)
            .bind(&insert.html_url)
            .bind(insert.issue_created_at)
            .bind(insert.issue_updated_at)
            .bind(insert.issue_closed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // Re-read post-write state in input order, one row per affected
        // record even when the batch repeats an external id.
        let mut seen: HashSet<i64> = HashSet::new();
        let mut records = Vec::with_capacity(inserts.len());
        for insert in inserts {
            if !seen.insert(insert.external_id) {
                continue;
            }
            let record = issue::get_by_external_id(&self.pool, insert.external_id)
                .await?
                .ok_or_else(|| {
                    SyncError::internal(format!(
                        "upserted issue {} missing after commit",
                        insert.external_id
                    ))
                })?;
            records.push(record);
        }

        if let Some(hook_tx) = &self.hook_tx {
            for record in &records {
                // A dropped receiver means no consumer is interested; the
                // write itself already succeeded.
                if hook_tx.send(IssueEvent::Upserted(record.clone())).is_err() {
                    log::debug!("hook channel closed, dropping upsert event");
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Upsert a single issue. Convenience wrapper over [`upsert_many`].
    ///
    /// [`upsert_many`]: IssueStore::upsert_many
    pub async fn upsert(&self, insert: &IssueCreate) -> Result<Issue, SyncError> {
        let mut records = self.upsert_many(std::slice::from_ref(insert)).await?;
        records
            .pop()
            .ok_or_else(|| SyncError::internal("upsert returned no record"))
    }

    /// Mark an issue deleted. Freshness timestamps stop advancing from here
    /// on; the record leaves the crawl population.
    pub async fn soft_delete(&self, external_id: i64, now: i64) -> Result<Option<Issue>, SyncError> {
        let result =
            sqlx::query("UPDATE issues SET deleted_at = ? WHERE external_id = ? AND deleted_at IS NULL")
                .bind(now)
                .bind(external_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let record = issue::get_by_external_id(&self.pool, external_id).await?;

        if let (Some(hook_tx), Some(record)) = (&self.hook_tx, &record) {
            if hook_tx.send(IssueEvent::SoftDeleted(record.clone())).is_err() {
                log::debug!("hook channel closed, dropping soft-delete event");
            }
        }

        Ok(record)
    }

    /// Record a resolved body sync attempt without touching payload or
    /// validator (304 and 404 legs).
    pub async fn mark_body_fetched(&self, external_id: i64, at: i64) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE issues SET body_fetched_at = ? WHERE external_id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a resolved timeline sync attempt (304 and 404 legs).
    pub async fn mark_timeline_fetched(&self, external_id: i64, at: i64) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE issues SET timeline_fetched_at = ? WHERE external_id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store the validator from a full body response together with the fetch
    /// timestamp. Only the Fresh leg may call this.
    pub async fn record_fresh_body(
        &self,
        external_id: i64,
        etag: Option<&str>,
        at: i64,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE issues SET etag = ?, body_fetched_at = ? WHERE external_id = ? AND deleted_at IS NULL",
        )
        .bind(etag)
        .bind(at)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the mirrored timeline wholesale and advance its timestamp.
    pub async fn replace_timeline(
        &self,
        external_id: i64,
        events: &[serde_json::Value],
        at: i64,
    ) -> Result<(), SyncError> {
        let events_json = serde_json::to_string(events)?;

        sqlx::query(
            "UPDATE issues SET timeline = ?, timeline_fetched_at = ? WHERE external_id = ? AND deleted_at IS NULL",
        )
        .bind(events_json)
        .bind(at)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
