//! Staleness-ordered candidate selection for the crawl loop.
//!
//! The scheduler picks a bounded, fairly ordered working set of issues whose
//! freshness has expired. Ordering is ascending by the dimension's fetch
//! timestamp with never-synced records (NULL) first, so repeatedly-synced
//! records always sink behind the backlog and nothing starves.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::issue::Issue;

/// Default staleness window: one hour.
pub const DEFAULT_STALENESS_SECS: i64 = 3600;

/// Default per-pass candidate cap.
pub const DEFAULT_CRAWL_LIMIT: i64 = 1000;

/// The two independent freshness dimensions of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlDimension {
    /// The issue body/metadata representation.
    Body,

    /// The issue's activity/timeline events.
    Timeline,
}

impl CrawlDimension {
    /// Column holding this dimension's last-resolved-fetch timestamp.
    fn column(self) -> &'static str {
        match self {
            CrawlDimension::Body => "body_fetched_at",
            CrawlDimension::Timeline => "timeline_fetched_at",
        }
    }

    /// Short name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            CrawlDimension::Body => "body",
            CrawlDimension::Timeline => "timeline",
        }
    }
}

/// Crawl selection policy.
#[derive(Debug, Clone)]
pub struct CrawlPolicy {
    /// How old a resolved fetch may be before the record is due again.
    pub staleness_secs: i64,

    /// Maximum candidates returned per pass. Callers drain the backlog by
    /// invoking selection repeatedly, not by raising this.
    pub limit: i64,
}

impl Default for CrawlPolicy {
    fn default() -> Self {
        Self {
            staleness_secs: DEFAULT_STALENESS_SECS,
            limit: DEFAULT_CRAWL_LIMIT,
        }
    }
}

/// Selects which locally-known issues are due for re-synchronization.
#[derive(Clone)]
pub struct CrawlScheduler {
    pool: DbPool,
    policy: CrawlPolicy,
}

impl CrawlScheduler {
    /// Create a scheduler with the default policy (1h window, 1000 cap).
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            policy: CrawlPolicy::default(),
        }
    }

    /// Create a scheduler with an explicit policy.
    pub fn with_policy(pool: DbPool, policy: CrawlPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &CrawlPolicy {
        &self.policy
    }

    /// Select a bounded batch of issues due for re-sync on one dimension.
    ///
    /// A candidate is a live issue in a live repository of a live
    /// organization holding sync credentials, whose dimension timestamp is
    /// NULL or older than `now - staleness`. An empty backlog returns an
    /// empty vec, never an error.
    pub async fn select_candidates(
        &self,
        dimension: CrawlDimension,
        now: i64,
    ) -> Result<Vec<Issue>, SyncError> {
        let column = dimension.column();
        let cutoff = now - self.policy.staleness_secs;

        // SQLite sorts NULLs first on ASC, which is exactly the fairness
        // order we want: never-synced before stale-but-synced.
        let query = format!(
            r#"
            SELECT i.* FROM issues i
            JOIN repositories r ON r.id = i.repository_id
            JOIN organizations o ON o.id = i.organization_id
            WHERE (i.{column} IS NULL OR i.{column} < ?)
              AND i.deleted_at IS NULL
              AND r.deleted_at IS NULL
              AND o.deleted_at IS NULL
              AND o.installation_id IS NOT NULL
            ORDER BY i.{column} ASC
            LIMIT ?
            "#,
            column = column
        );

        let candidates = sqlx::query_as::<_, Issue>(&query)
            .bind(cutoff)
            .bind(self.policy.limit)
            .fetch_all(&self.pool)
            .await?;

        log::debug!(
            "selected {} {} crawl candidate(s)",
            candidates.len(),
            dimension.as_str()
        );

        Ok(candidates)
    }
}
