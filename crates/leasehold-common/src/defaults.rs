//! Default configuration values shared by the broker and CLI
//!
//! Timeouts bound every wait on the panel; nothing polls forever.

/// Interval between completion probes against the panel, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// How long to wait for a power signal to take effect, in seconds
pub const DEFAULT_POWER_TIMEOUT_SECS: u64 = 120;

/// How long to wait for a reinstall to finish, in seconds (15 minutes)
pub const DEFAULT_REINSTALL_TIMEOUT_SECS: u64 = 900;

/// How long to wait for a snapshot to complete, in seconds (30 minutes)
pub const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 1800;

/// Scheduler tick, in seconds (hourly)
pub const DEFAULT_SCHEDULER_TICK_SECS: u64 = 3600;

/// Leases ending within this many hours get a return reminder
pub const DEFAULT_REMINDER_WINDOW_HOURS: i64 = 24;

/// Longest lease duration accepted at creation or extension
pub const MAX_LEASE_DURATION_DAYS: i64 = 365;

/// Key prefix for archived snapshots in durable storage
pub const DEFAULT_ARCHIVE_PREFIX: &str = "leasehold";

/// Startup variable the panel uses to select the server version
pub const VERSION_VARIABLE: &str = "VERSION";
