//! Configuration types for the broker

use crate::wait::WaitConfig;
use leasehold_common::defaults::{
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POWER_TIMEOUT_SECS, DEFAULT_REINSTALL_TIMEOUT_SECS,
    DEFAULT_REMINDER_WINDOW_HOURS, DEFAULT_SCHEDULER_TICK_SECS, DEFAULT_SNAPSHOT_TIMEOUT_SECS,
    MAX_LEASE_DURATION_DAYS,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("panel url cannot be empty")]
    EmptyPanelUrl,

    #[error("panel url must start with http:// or https://, got: {0}")]
    InvalidPanelUrl(String),

    #[error("panel api key cannot be empty")]
    EmptyApiKey,

    #[error("archive bucket cannot be empty")]
    EmptyBucket,

    #[error("archive region cannot be empty")]
    EmptyRegion,

    #[error("poll interval must be greater than 0")]
    InvalidPollInterval,

    #[error("{0} timeout must be at least one poll interval")]
    TimeoutTooShort(&'static str),

    #[error("max lease duration must be between 1 and {MAX_LEASE_DURATION_DAYS} days, got {0}")]
    InvalidMaxDuration(i64),

    #[error("scheduler tick must be greater than 0")]
    InvalidTick,

    #[error("reminder window must be positive")]
    InvalidReminderWindow,
}

/// Polling cadence and deadlines for panel operations
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub power_timeout: Duration,
    pub reinstall_timeout: Duration,
    pub snapshot_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            power_timeout: Duration::from_secs(DEFAULT_POWER_TIMEOUT_SECS),
            reinstall_timeout: Duration::from_secs(DEFAULT_REINSTALL_TIMEOUT_SECS),
            snapshot_timeout: Duration::from_secs(DEFAULT_SNAPSHOT_TIMEOUT_SECS),
        }
    }
}

impl PollSettings {
    pub fn power(&self) -> WaitConfig {
        WaitConfig::new(self.interval, self.power_timeout)
    }

    pub fn reinstall(&self) -> WaitConfig {
        WaitConfig::new(self.interval, self.reinstall_timeout)
    }

    pub fn snapshot(&self) -> WaitConfig {
        WaitConfig::new(self.interval, self.snapshot_timeout)
    }
}

/// Panel client API connection
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Base URL, e.g. `https://panel.example.org`
    pub base_url: String,
    /// Client API key (bearer token)
    pub api_key: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    pub polling: PollSettings,
}

/// Where archived snapshots land
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveBackend {
    S3 {
        bucket: String,
        prefix: String,
        region: String,
    },
    Directory {
        root: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub backend: ArchiveBackend,
    /// Scratch space for downloads; system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

/// Lease lifecycle policy
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Container image applied when provisioning; skipped when unset
    pub container_image: Option<String>,
    pub max_duration_days: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            container_image: None,
            max_duration_days: MAX_LEASE_DURATION_DAYS,
        }
    }
}

/// Periodic sweep settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub reminder_window: chrono::Duration,
    /// Return overdue leases automatically instead of only notifying
    pub auto_return: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(DEFAULT_SCHEDULER_TICK_SECS),
            reminder_window: chrono::Duration::hours(DEFAULT_REMINDER_WINDOW_HOURS),
            auto_return: false,
        }
    }
}

/// Full broker configuration
///
/// Composed of focused sub-configs; the CLI builds it from flags and
/// environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub panel: PanelConfig,
    pub archive: ArchiveConfig,
    pub lease: LeaseConfig,
    pub scheduler: SchedulerConfig,
    /// State database path; per-user data dir when unset
    pub db_path: Option<PathBuf>,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.panel.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyPanelUrl);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidPanelUrl(url.to_string()));
        }
        if self.panel.api_key.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }

        let polling = &self.panel.polling;
        if polling.interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        for (name, timeout) in [
            ("power", polling.power_timeout),
            ("reinstall", polling.reinstall_timeout),
            ("snapshot", polling.snapshot_timeout),
        ] {
            if timeout < polling.interval {
                return Err(ConfigError::TimeoutTooShort(name));
            }
        }

        if let ArchiveBackend::S3 { bucket, region, .. } = &self.archive.backend {
            if bucket.trim().is_empty() {
                return Err(ConfigError::EmptyBucket);
            }
            if region.trim().is_empty() {
                return Err(ConfigError::EmptyRegion);
            }
        }

        if !(1..=MAX_LEASE_DURATION_DAYS).contains(&self.lease.max_duration_days) {
            return Err(ConfigError::InvalidMaxDuration(
                self.lease.max_duration_days,
            ));
        }

        if self.scheduler.tick.is_zero() {
            return Err(ConfigError::InvalidTick);
        }
        if self.scheduler.reminder_window <= chrono::Duration::zero() {
            return Err(ConfigError::InvalidReminderWindow);
        }

        Ok(())
    }
}
