//! Broker error taxonomy
//!
//! Validation and state errors are raised before any side effect. Remote,
//! timeout and quota errors propagate with the lease's persisted status
//! unchanged; callers retry by re-invoking the operation.

use crate::remote::{PanelError, classify_anyhow_error};
use crate::wait::WaitError;
use leasehold_common::{LeaseStatus, VersionTagError};
use std::time::Duration;
use thiserror::Error;

/// Result alias for broker operations
pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Errors surfaced by the lease service, allocator and archiver
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Operation not legal from the lease's current status
    #[error("Cannot {operation} lease {lease_id}: lease is {actual}")]
    InvalidState {
        lease_id: i64,
        operation: &'static str,
        actual: LeaseStatus,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Every resource in the pool is leased or being provisioned
    #[error("No free resource available for lease {lease_id}")]
    ResourceExhausted { lease_id: i64 },

    /// Not enough unheld snapshots to make room for a new one
    #[error(
        "Snapshot quota exhausted on {resource}: {needed} must be evicted but only {evictable} are unheld"
    )]
    QuotaExhausted {
        resource: String,
        needed: usize,
        evictable: usize,
    },

    #[error("Remote operation '{operation}' failed: {message}")]
    RemoteOperationFailed { operation: String, message: String },

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Wrap a remote client failure, keeping its full context chain.
    ///
    /// A panel 404 anywhere in the chain becomes [`BrokerError::NotFound`].
    pub fn remote(operation: impl Into<String>, err: anyhow::Error) -> Self {
        if let Some(PanelError::Status { path, .. }) =
            classify_anyhow_error(&err).filter(|e| e.is_not_found())
        {
            return Self::not_found("panel object", path);
        }
        Self::RemoteOperationFailed {
            operation: operation.into(),
            message: format!("{err:#}"),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Errors worth retrying later with the same inputs
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. }
                | Self::RemoteOperationFailed { .. }
                | Self::Timeout { .. }
        )
    }
}

impl From<WaitError> for BrokerError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout {
                resource, after, ..
            } => Self::Timeout {
                operation: resource,
                after,
            },
            WaitError::Cancelled { resource } => Self::RemoteOperationFailed {
                operation: resource,
                message: "wait cancelled".to_string(),
            },
            WaitError::Failed { resource, message } => Self::RemoteOperationFailed {
                operation: resource,
                message,
            },
        }
    }
}

/// Input rejected before anything is written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("lease name cannot be empty")]
    EmptyName,

    #[error("duration must be between 1 and {max} days, got {got}")]
    InvalidDuration { got: i64, max: i64 },

    #[error("at least one collaborator is required")]
    NoCollaborators,

    #[error("collaborator id cannot be empty")]
    EmptyCollaboratorId,

    #[error("invalid version tag: {0}")]
    InvalidVersionTag(#[from] VersionTagError),

    #[error("resource alias cannot be empty")]
    EmptyAlias,

    #[error("resource physical id cannot be empty")]
    EmptyPhysicalId,

    #[error("resource alias '{0}' or its physical id is already registered")]
    AliasTaken(String),

    #[error("new end {end} is not in the future")]
    EndInPast { end: chrono::DateTime<chrono::Utc> },

    #[error("resource '{alias}' is held by active lease {lease_id}")]
    ResourceInUse { alias: String, lease_id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::InvalidState {
            lease_id: 7,
            operation: "approve",
            actual: LeaseStatus::Returned,
        };
        assert_eq!(
            err.to_string(),
            "Cannot approve lease 7: lease is returned"
        );

        let err = BrokerError::QuotaExhausted {
            resource: "srv-1".to_string(),
            needed: 1,
            evictable: 0,
        };
        assert!(err.to_string().contains("srv-1"));
        assert_eq!(
            ValidationError::InvalidDuration { got: 0, max: 365 }.to_string(),
            "duration must be between 1 and 365 days, got 0"
        );
    }

    #[test]
    fn test_remote_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection refused").context("Failed to send power signal");
        let err = BrokerError::remote("power", inner);
        let msg = err.to_string();
        assert!(msg.contains("Failed to send power signal"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_remote_not_found_maps_to_not_found() {
        let missing = PanelError::Status {
            method: "DELETE".to_string(),
            path: "/api/client/servers/srv-a/backups/b1".to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
            body: String::new(),
        };
        let err = BrokerError::remote(
            "delete snapshot",
            anyhow::Error::new(missing).context("Failed to delete snapshot"),
        );
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("/backups/b1"));

        let unavailable = PanelError::Status {
            method: "POST".to_string(),
            path: "/api/client/servers/srv-a/power".to_string(),
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        let err = BrokerError::remote("power off", anyhow::Error::new(unavailable));
        assert!(matches!(err, BrokerError::RemoteOperationFailed { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_wait_error_mapping() {
        let err: BrokerError = WaitError::Timeout {
            resource: "snapshot".to_string(),
            after: Duration::from_secs(5),
            attempts: 5,
        }
        .into();
        assert!(matches!(err, BrokerError::Timeout { .. }));

        let err: BrokerError = WaitError::Failed {
            resource: "reinstall".to_string(),
            message: "install failed".to_string(),
        }
        .into();
        assert!(matches!(err, BrokerError::RemoteOperationFailed { .. }));
    }

    #[test]
    fn test_retryable() {
        assert!(BrokerError::ResourceExhausted { lease_id: 1 }.is_retryable());
        assert!(!BrokerError::Validation(ValidationError::EmptyName).is_retryable());
        assert!(BrokerError::not_found("lease", 3).is_not_found());
    }
}
