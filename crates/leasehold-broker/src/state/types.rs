//! State types

use chrono::{DateTime, Duration, NaiveDate, Utc};
use leasehold_common::{LeaseStatus, VersionTag};
use serde::{Deserialize, Serialize};

/// Opaque chat-platform user id
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::Deref,
)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A lease row
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub id: i64,
    pub name: String,
    pub requester_id: PrincipalId,
    pub owner_id: PrincipalId,
    pub status: LeaseStatus,
    pub desired_duration_days: i64,
    /// Physical id of the held resource; set only while active
    pub assigned_resource_id: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub event_date: NaiveDate,
    pub version_tag: Option<VersionTag>,
    pub description: String,
    pub collaborators: Vec<PrincipalId>,
    pub created_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    /// Physical id the lease held before it was returned
    pub released_resource_id: Option<String>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub overdue_notified_at: Option<DateTime<Utc>>,
}

impl Lease {
    /// Whether an active lease has run past its end
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == LeaseStatus::Active && self.end_at.is_some_and(|end| end <= now)
    }

    /// Whether a return reminder went out inside the current end's window
    pub fn reminded(&self, window: Duration) -> bool {
        match (self.reminder_sent_at, self.end_at) {
            (Some(sent), Some(end)) => sent >= end - window,
            _ => false,
        }
    }

    /// Whether the owner was told the current end has passed
    pub fn overdue_notified(&self) -> bool {
        match (self.overdue_notified_at, self.end_at) {
            (Some(notified), Some(end)) => notified >= end,
            _ => false,
        }
    }
}

/// A server in the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Human-facing name, unique
    pub alias: String,
    /// Panel server identifier, unique and stable
    pub physical_id: String,
    pub created_at: DateTime<Utc>,
}
