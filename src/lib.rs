//! issue-mirror - Local mirror of externally-owned issue records.
//!
//! Keeps a SQLite mirror of remote issues synchronized with the remote
//! source of truth while minimizing redundant network traffic. Fetches are
//! conditional (ETag-based), remote outcomes map onto idempotent local state
//! transitions, and a staleness-ordered crawl scheduler selects bounded,
//! fairly ordered batches of records due for re-synchronization.
//!
//! Entry points: [`services::CrawlScheduler::select_candidates`] for
//! candidate selection, [`services::SyncEngine::sync_issue`] and
//! [`services::SyncEngine::store_remote_issues`] for synchronization, and
//! [`services::SyncEngine::start_background`] for cadence-driven crawling.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::SyncError;
