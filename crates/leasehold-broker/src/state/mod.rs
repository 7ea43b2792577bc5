//! SQLite state for leases and the resource pool
//!
//! Uses sqlx for async database access with a connection pool. Transition
//! writes are compare-and-set updates keyed on the expected status and
//! report whether they applied.

mod cli;
mod crud;
mod db;
mod queries;
mod types;

pub use db::{DbPool, open_db, setup_schema};
pub use types::{Lease, PrincipalId, Resource};

pub use crud::{
    claim_resource, delete_resource, insert_lease, insert_resource, mark_overdue_notified,
    mark_reminder_sent, mark_returned, reject_lease, set_duration, set_end,
};

pub use queries::{
    active_lease_for_resource, available_resources, get_lease, get_resource_by_alias,
    get_resource_by_physical_id, leases_by_status, list_leases, list_resources,
};

pub use cli::{lease_table, resource_table};

#[cfg(test)]
pub(crate) async fn open_test_db() -> DbPool {
    let pool = leasehold_test_utils::open_test_db().await.unwrap();
    setup_schema(&pool).await.unwrap();
    pool
}
