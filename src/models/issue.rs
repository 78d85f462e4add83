//! Mirrored issue record and its canonical creation shape.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;
use crate::services::github_client::RemoteIssue;

/// A locally mirrored issue.
///
/// `external_id` is the remote-assigned identifier and the only upsert
/// conflict key; local `id` is never used for conflict resolution.
///
/// The two fetch timestamps are independent freshness dimensions: an issue
/// can be due for a body re-sync while its timeline is still fresh.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub id: i64,

    /// Stable identifier assigned by the remote source.
    pub external_id: i64,

    /// Owning organization (FK to organizations).
    pub organization_id: i64,

    /// Owning repository (FK to repositories).
    pub repository_id: i64,

    /// Issue number within the repository (URL path segment).
    pub number: i64,

    pub title: String,

    /// Remote state string ("open", "closed").
    pub state: String,

    pub body: Option<String>,

    pub html_url: String,

    /// Creation timestamp reported by the remote (Unix seconds).
    pub issue_created_at: i64,

    pub issue_updated_at: Option<i64>,

    pub issue_closed_at: Option<i64>,

    /// Mirrored timeline events as raw JSON; replaced wholesale on a fresh
    /// timeline fetch.
    pub timeline: Option<String>,

    /// Cache validator from the last full body response. Only ever written
    /// from a 200; a 304 or any failure leaves it untouched.
    pub etag: Option<String>,

    /// Last resolved body sync attempt (Unix seconds); NULL until the first.
    pub body_fetched_at: Option<i64>,

    /// Last resolved timeline sync attempt (Unix seconds); NULL until the first.
    pub timeline_fetched_at: Option<i64>,

    /// Soft-deletion marker. Set once the remote reports the issue gone.
    pub deleted_at: Option<i64>,
}

/// Canonical creation/update shape for an issue.
///
/// Every input path (crawl fetch, webhook payload) is normalized into this
/// one type at the boundary; the store and engine never see raw wire shapes.
#[derive(Debug, Clone)]
pub struct IssueCreate {
    pub external_id: i64,
    pub organization_id: i64,
    pub repository_id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub body: Option<String>,
    pub html_url: String,
    pub issue_created_at: i64,
    pub issue_updated_at: Option<i64>,
    pub issue_closed_at: Option<i64>,
}

impl IssueCreate {
    /// Normalize a remote API issue into the canonical creation shape.
    pub fn from_remote(issue: &RemoteIssue, organization_id: i64, repository_id: i64) -> Self {
        Self {
            external_id: issue.id,
            organization_id,
            repository_id,
            number: issue.number,
            title: issue.title.clone(),
            state: issue.state.clone(),
            body: issue.body.clone(),
            html_url: issue.html_url.clone(),
            issue_created_at: parse_iso_timestamp(&issue.created_at),
            issue_updated_at: issue.updated_at.as_deref().map(parse_iso_timestamp),
            issue_closed_at: issue.closed_at.as_deref().map(parse_iso_timestamp),
        }
    }
}

const ISSUE_COLUMNS: &str = "id, external_id, organization_id, repository_id, number, title, state, \
     body, html_url, issue_created_at, issue_updated_at, issue_closed_at, timeline, etag, \
     body_fetched_at, timeline_fetched_at, deleted_at";

/// Look up an issue by its remote-assigned identifier.
pub async fn get_by_external_id(
    pool: &DbPool,
    external_id: i64,
) -> Result<Option<Issue>, sqlx::Error> {
    let query = format!("SELECT {} FROM issues WHERE external_id = ?", ISSUE_COLUMNS);
    sqlx::query_as::<_, Issue>(&query)
        .bind(external_id)
        .fetch_optional(pool)
        .await
}

/// Count live (not soft-deleted) issues.
pub async fn count_live(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issues WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

/// Parse an ISO 8601 timestamp to Unix seconds. Malformed input maps to 0.
pub(crate) fn parse_iso_timestamp(s: &str) -> i64 {
    match chrono::DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.timestamp(),
        Err(e) => {
            log::warn!("unparseable remote timestamp {:?}: {}", s, e);
            0
        }
    }
}
