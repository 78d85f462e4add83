//! Data models for the issue mirror.
//!
//! These models represent the core entities stored in the local SQLite
//! database. All models derive Serialize for log/API output and FromRow for
//! SQLx queries.

pub mod issue;
pub mod organization;
pub mod repository;

// Re-exports for convenient access
pub use issue::{Issue, IssueCreate};
pub use organization::Organization;
pub use repository::Repository;
