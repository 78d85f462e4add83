//! Owning organizational scope for mirrored issues.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;

/// An organization that owns repositories on the remote source.
///
/// `installation_id` is the credential under which the remote API is crawled.
/// Organizations without one are excluded from candidate selection entirely
/// rather than surfacing per-record configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: i64,

    /// Remote account name (URL path segment).
    pub name: String,

    /// Remote app installation used for API access; None means not crawlable.
    pub installation_id: Option<i64>,

    /// Soft-deletion marker (Unix seconds).
    pub deleted_at: Option<i64>,
}

/// Insert an organization, returning its row id.
pub async fn create_organization(
    pool: &DbPool,
    name: &str,
    installation_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO organizations (name, installation_id) VALUES (?, ?)")
        .bind(name)
        .bind(installation_id)
        .execute(pool)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Look up an organization by id.
pub async fn get_organization(
    pool: &DbPool,
    id: i64,
) -> Result<Option<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>(
        "SELECT id, name, installation_id, deleted_at FROM organizations WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Soft-delete an organization. Its issues drop out of crawl selection.
pub async fn soft_delete_organization(
    pool: &DbPool,
    id: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE organizations SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
