//! Outbound notifications
//!
//! Delivery is out of scope for the broker; it hands each event to a
//! [`Notifier`]. The default [`TracingNotifier`] only logs.

use chrono::{DateTime, Utc};
use tracing::info;

/// Events raised by successful lease transitions and scheduler sweeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    LeaseRequested {
        lease_id: i64,
        name: String,
        requester_id: String,
    },
    LeaseApproved {
        lease_id: i64,
        resource: String,
        end_at: DateTime<Utc>,
    },
    LeaseRejected {
        lease_id: i64,
    },
    LeaseExtended {
        lease_id: i64,
        days: i64,
        end_at: Option<DateTime<Utc>>,
    },
    LeaseReturned {
        lease_id: i64,
        resource: String,
        archive_folder: Option<String>,
    },
    ReturnReminder {
        lease_id: i64,
        owner_id: String,
        end_at: DateTime<Utc>,
    },
    LeaseOverdue {
        lease_id: i64,
        owner_id: String,
        end_at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn lease_id(&self) -> i64 {
        match self {
            Self::LeaseRequested { lease_id, .. }
            | Self::LeaseApproved { lease_id, .. }
            | Self::LeaseRejected { lease_id }
            | Self::LeaseExtended { lease_id, .. }
            | Self::LeaseReturned { lease_id, .. }
            | Self::ReturnReminder { lease_id, .. }
            | Self::LeaseOverdue { lease_id, .. } => *lease_id,
        }
    }

    /// Short machine-friendly event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LeaseRequested { .. } => "lease_requested",
            Self::LeaseApproved { .. } => "lease_approved",
            Self::LeaseRejected { .. } => "lease_rejected",
            Self::LeaseExtended { .. } => "lease_extended",
            Self::LeaseReturned { .. } => "lease_returned",
            Self::ReturnReminder { .. } => "return_reminder",
            Self::LeaseOverdue { .. } => "lease_overdue",
        }
    }
}

/// Sink for lease events. Failures are logged by the caller and never
/// fail the transition that raised the event.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Logs every notification at INFO
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            event = notification.kind(),
            lease_id = notification.lease_id(),
            detail = ?notification,
            "Lease notification"
        );
        Ok(())
    }
}

/// Deliver `notification`, logging instead of failing.
pub(crate) fn deliver(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification) {
        tracing::warn!(
            event = notification.kind(),
            lease_id = notification.lease_id(),
            error = ?e,
            "Failed to deliver notification"
        );
    }
}
