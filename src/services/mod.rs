//! Core synchronization services.
//!
//! This module contains the sync engine proper: the conditional remote
//! client, the upsert store with post-commit hook dispatch, the crawl
//! scheduler, and the per-record sync logic.
//!
//! Services take their dependencies through constructors and hold no global
//! state, so each is testable in isolation.

pub mod crawl_scheduler;
pub mod github_client;
pub mod issue_store;
pub mod sync_engine;

pub use crawl_scheduler::{CrawlDimension, CrawlPolicy, CrawlScheduler};
pub use github_client::{FetchOutcome, GithubClient, GithubClientConfig, IssueFetch, RemoteIssue};
pub use issue_store::{IssueEvent, IssueStore};
pub use sync_engine::{CrawlConfig, CrawlHandle, CrawlSummary, SyncEngine, SyncOutcome};
