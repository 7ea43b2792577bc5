//! Query operations for state database

use super::db::DbPool;
use super::types::{Lease, PrincipalId, Resource};
use chrono::{DateTime, NaiveDate, Utc};
use leasehold_common::{LeaseStatus, VersionTag};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;

const LEASE_COLUMNS: &str = "id, name, requester_id, owner_id, status, desired_duration_days,
    assigned_resource_id, start_at, end_at, event_date, version_tag, description,
    collaborators, created_at, returned_at, released_resource_id, reminder_sent_at,
    overdue_notified_at";

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn parse_timestamp(s: &str) -> sqlx::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_err)
}

fn parse_optional_timestamp(row: &SqliteRow, column: &str) -> sqlx::Result<Option<DateTime<Utc>>> {
    row.try_get::<Option<String>, _>(column)?
        .as_deref()
        .map(parse_timestamp)
        .transpose()
}

fn lease_from_row(row: &SqliteRow) -> sqlx::Result<Lease> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<LeaseStatus>().map_err(decode_err)?;

    let event_date: String = row.try_get("event_date")?;
    let event_date = event_date.parse::<NaiveDate>().map_err(decode_err)?;

    let version_tag = row
        .try_get::<Option<String>, _>("version_tag")?
        .as_deref()
        .map(VersionTag::parse)
        .transpose()
        .map_err(decode_err)?;

    let Json(collaborators) = row.try_get::<Json<Vec<PrincipalId>>, _>("collaborators")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Lease {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        requester_id: PrincipalId::new(row.try_get::<String, _>("requester_id")?),
        owner_id: PrincipalId::new(row.try_get::<String, _>("owner_id")?),
        status,
        desired_duration_days: row.try_get("desired_duration_days")?,
        assigned_resource_id: row.try_get("assigned_resource_id")?,
        start_at: parse_optional_timestamp(row, "start_at")?,
        end_at: parse_optional_timestamp(row, "end_at")?,
        event_date,
        version_tag,
        description: row.try_get("description")?,
        collaborators,
        created_at: parse_timestamp(&created_at)?,
        returned_at: parse_optional_timestamp(row, "returned_at")?,
        released_resource_id: row.try_get("released_resource_id")?,
        reminder_sent_at: parse_optional_timestamp(row, "reminder_sent_at")?,
        overdue_notified_at: parse_optional_timestamp(row, "overdue_notified_at")?,
    })
}

fn resource_from_row(row: &SqliteRow) -> sqlx::Result<Resource> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Resource {
        alias: row.try_get("alias")?,
        physical_id: row.try_get("physical_id")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Get a lease by id
pub async fn get_lease(pool: &DbPool, lease_id: i64) -> sqlx::Result<Option<Lease>> {
    let row = sqlx::query(&format!("SELECT {LEASE_COLUMNS} FROM leases WHERE id = ?"))
        .bind(lease_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(lease_from_row).transpose()
}

/// Leases in `status`, oldest first
pub async fn leases_by_status(pool: &DbPool, status: LeaseStatus) -> sqlx::Result<Vec<Lease>> {
    let rows = sqlx::query(&format!(
        "SELECT {LEASE_COLUMNS} FROM leases WHERE status = ? ORDER BY id"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(lease_from_row).collect()
}

/// Every lease, oldest first
pub async fn list_leases(pool: &DbPool) -> sqlx::Result<Vec<Lease>> {
    let rows = sqlx::query(&format!("SELECT {LEASE_COLUMNS} FROM leases ORDER BY id"))
        .fetch_all(pool)
        .await?;

    rows.iter().map(lease_from_row).collect()
}

/// Id of the active lease holding `physical_id`, if any
pub async fn active_lease_for_resource(
    pool: &DbPool,
    physical_id: &str,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar(
        "SELECT id FROM leases WHERE status = 'active' AND assigned_resource_id = ?",
    )
    .bind(physical_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_resource_by_alias(pool: &DbPool, alias: &str) -> sqlx::Result<Option<Resource>> {
    let row = sqlx::query("SELECT alias, physical_id, created_at FROM resources WHERE alias = ?")
        .bind(alias)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(resource_from_row).transpose()
}

pub async fn get_resource_by_physical_id(
    pool: &DbPool,
    physical_id: &str,
) -> sqlx::Result<Option<Resource>> {
    let row =
        sqlx::query("SELECT alias, physical_id, created_at FROM resources WHERE physical_id = ?")
            .bind(physical_id)
            .fetch_optional(pool)
            .await?;

    row.as_ref().map(resource_from_row).transpose()
}

/// All resources by ascending alias
pub async fn list_resources(pool: &DbPool) -> sqlx::Result<Vec<Resource>> {
    let rows = sqlx::query("SELECT alias, physical_id, created_at FROM resources ORDER BY alias")
        .fetch_all(pool)
        .await?;

    rows.iter().map(resource_from_row).collect()
}

/// Resources no active lease references, by ascending alias
pub async fn available_resources(pool: &DbPool) -> sqlx::Result<Vec<Resource>> {
    let rows = sqlx::query(
        "SELECT alias, physical_id, created_at FROM resources
         WHERE NOT EXISTS (
             SELECT 1 FROM leases
             WHERE leases.status = 'active'
             AND leases.assigned_resource_id = resources.physical_id
         )
         ORDER BY alias",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(resource_from_row).collect()
}
