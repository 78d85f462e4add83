//! Container scope (repository) for mirrored issues.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;

/// A repository belonging to an organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: i64,

    /// Owning organization (FK to organizations).
    pub organization_id: i64,

    /// Remote repository name (URL path segment).
    pub name: String,

    /// Soft-deletion marker (Unix seconds).
    pub deleted_at: Option<i64>,
}

/// Insert a repository, returning its row id.
pub async fn create_repository(
    pool: &DbPool,
    organization_id: i64,
    name: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO repositories (organization_id, name) VALUES (?, ?)")
        .bind(organization_id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Look up a repository by id.
pub async fn get_repository(pool: &DbPool, id: i64) -> Result<Option<Repository>, sqlx::Error> {
    sqlx::query_as::<_, Repository>(
        "SELECT id, organization_id, name, deleted_at FROM repositories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Soft-delete a repository. Its issues drop out of crawl selection.
pub async fn soft_delete_repository(pool: &DbPool, id: i64, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE repositories SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
