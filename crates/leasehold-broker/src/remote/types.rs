//! Panel-side types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Power signals accepted by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerSignal {
    /// Server state that marks the signal as applied
    pub fn target_state(self) -> ServerState {
        match self {
            Self::Start | Self::Restart => ServerState::Running,
            Self::Stop | Self::Kill => ServerState::Offline,
        }
    }
}

/// Process state reported by the panel
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ServerState {
    Offline,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    /// Parse from string, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Panel snapshot identifier
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A point-in-time copy of a server's files, held by the panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub name: String,
    /// Held snapshots are exempt from quota eviction
    pub held: bool,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub completed: bool,
    pub successful: bool,
}

impl Snapshot {
    /// Finished and usable
    pub fn is_archivable(&self) -> bool {
        self.completed && self.successful
    }
}

/// Reinstall progress as reported by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum InstallStatus {
    Installing,
    Installed,
    Failed,
}
