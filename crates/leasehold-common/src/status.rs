//! Lease lifecycle status
//!
//! Stored as lowercase text in the state database. The only legal edges are
//! `pending -> active -> returned` and `pending -> rejected`.

use serde::{Deserialize, Serialize};

/// Where a lease is in its lifecycle
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum LeaseStatus {
    /// Requested, waiting for an operator decision
    #[default]
    #[strum(serialize = "pending")]
    Pending,
    /// Holding a resource
    #[strum(serialize = "active")]
    Active,
    /// Declined before any resource was assigned
    #[strum(serialize = "rejected")]
    Rejected,
    /// Resource archived, wiped and handed back
    #[strum(serialize = "returned")]
    Returned,
}

impl LeaseStatus {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
        }
    }

    /// Check if no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Returned)
    }

    /// Parse from string, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Whether `self -> next` is an edge of the lifecycle
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Rejected)
                | (Self::Active, Self::Returned)
        )
    }
}
