//! CRUD operations for state database
//!
//! Transition writes return `true` when the row was in the expected status
//! and got updated, `false` when another writer got there first.

use super::db::DbPool;
use super::types::PrincipalId;
use crate::lease::LeaseAttrs;
use chrono::{DateTime, Utc};
use leasehold_common::LeaseStatus;
use sqlx::types::Json;

/// Register a resource in the pool
pub async fn insert_resource(
    pool: &DbPool,
    alias: &str,
    physical_id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO resources (alias, physical_id, created_at) VALUES (?, ?, ?)")
        .bind(alias)
        .bind(physical_id)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;

    Ok(())
}

/// Remove a resource unless an active lease holds it
pub async fn delete_resource(pool: &DbPool, alias: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "DELETE FROM resources
         WHERE alias = ?
         AND NOT EXISTS (
             SELECT 1 FROM leases
             WHERE leases.status = 'active'
             AND leases.assigned_resource_id = resources.physical_id
         )",
    )
    .bind(alias)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert a pending lease and return its id
pub async fn insert_lease(
    pool: &DbPool,
    requester_id: &PrincipalId,
    owner_id: &PrincipalId,
    attrs: &LeaseAttrs,
    now: DateTime<Utc>,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO leases (name, requester_id, owner_id, status, desired_duration_days,
                             event_date, version_tag, description, collaborators, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&attrs.name)
    .bind(requester_id.as_str())
    .bind(owner_id.as_str())
    .bind(LeaseStatus::Pending.as_str())
    .bind(attrs.desired_duration_days)
    .bind(attrs.event_date.to_string())
    .bind(attrs.version_tag.map(|t| t.to_string()))
    .bind(&attrs.description)
    .bind(Json(&attrs.collaborators))
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Move a pending lease to active on `physical_id`.
///
/// Applies only while the lease is pending and no other lease is active on
/// the same resource. A unique-index violation from a concurrent writer is
/// reported as a lost claim.
pub async fn claim_resource(
    pool: &DbPool,
    lease_id: i64,
    physical_id: &str,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE leases
         SET status = 'active', assigned_resource_id = ?, start_at = ?, end_at = ?
         WHERE id = ? AND status = 'pending'
         AND NOT EXISTS (
             SELECT 1 FROM leases AS other
             WHERE other.status = 'active' AND other.assigned_resource_id = ?
         )",
    )
    .bind(physical_id)
    .bind(start_at.to_rfc3339())
    .bind(end_at.to_rfc3339())
    .bind(lease_id)
    .bind(physical_id)
    .execute(pool)
    .await;

    match result {
        Ok(r) => Ok(r.rows_affected() == 1),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Pending -> rejected
pub async fn reject_lease(pool: &DbPool, lease_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("UPDATE leases SET status = 'rejected' WHERE id = ? AND status = 'pending'")
        .bind(lease_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Change the requested duration of a pending lease
pub async fn set_duration(pool: &DbPool, lease_id: i64, days: i64) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE leases SET desired_duration_days = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(days)
    .bind(lease_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move the end of an active lease
pub async fn set_end(pool: &DbPool, lease_id: i64, end_at: DateTime<Utc>) -> sqlx::Result<bool> {
    let result = sqlx::query("UPDATE leases SET end_at = ? WHERE id = ? AND status = 'active'")
        .bind(end_at.to_rfc3339())
        .bind(lease_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Active -> returned, releasing the resource
pub async fn mark_returned(
    pool: &DbPool,
    lease_id: i64,
    returned_at: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE leases
         SET status = 'returned', released_resource_id = assigned_resource_id,
             assigned_resource_id = NULL, returned_at = ?
         WHERE id = ? AND status = 'active'",
    )
    .bind(returned_at.to_rfc3339())
    .bind(lease_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a return reminder.
///
/// `previous` is the `reminder_sent_at` the caller read; false if another
/// writer changed it since.
pub async fn mark_reminder_sent(
    pool: &DbPool,
    lease_id: i64,
    previous: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE leases SET reminder_sent_at = ?
         WHERE id = ? AND status = 'active' AND reminder_sent_at IS ?",
    )
    .bind(at.to_rfc3339())
    .bind(lease_id)
    .bind(previous.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record an overdue notice, compare-and-set like [`mark_reminder_sent`]
pub async fn mark_overdue_notified(
    pool: &DbPool,
    lease_id: i64,
    previous: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE leases SET overdue_notified_at = ?
         WHERE id = ? AND status = 'active' AND overdue_notified_at IS ?",
    )
    .bind(at.to_rfc3339())
    .bind(lease_id)
    .bind(previous.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
