//! Fixed-interval polling with a deadline and cancellation support.
//!
//! The panel has no push channel, so every long-running remote operation is
//! observed by probing until a condition holds. Every wait is bounded by
//! `WaitConfig::timeout`.

use backon::{BackoffBuilder, ConstantBuilder};
use leasehold_common::defaults::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POWER_TIMEOUT_SECS};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Polling cadence and deadline for one wait.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay between probes
    pub interval: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
    /// Stops the wait early when fired
    pub cancel: Option<CancellationToken>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_POWER_TIMEOUT_SECS),
            cancel: None,
        }
    }
}

impl WaitConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Upper bound on probes that fit before the deadline
    fn max_probes(&self) -> usize {
        if self.interval.is_zero() {
            return usize::MAX;
        }
        (self.timeout.as_millis() / self.interval.as_millis().max(1)) as usize + 1
    }
}

/// Terminal failure of a wait. Cloneable so a memoized outcome can be
/// handed to every caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("Timeout waiting for {resource} after {after:?} ({attempts} attempts)")]
    Timeout {
        resource: String,
        after: Duration,
        attempts: u32,
    },

    #[error("Wait for {resource} cancelled")]
    Cancelled { resource: String },

    #[error("{resource} failed: {message}")]
    Failed { resource: String, message: String },
}

/// Probe until it yields a value, the deadline passes, or the wait is
/// cancelled.
///
/// `probe` returns `Ok(Some(v))` when done, `Ok(None)` to keep polling and
/// `Err` to stop with [`WaitError::Failed`]. Nothing is probed once the
/// deadline has passed.
///
/// ```ignore
/// let state = poll_until(&config, "server offline", || async {
///     let state = client.server_state(id).await?;
///     Ok((state == ServerState::Offline).then_some(state))
/// })
/// .await?;
/// ```
pub async fn poll_until<T, F, Fut>(
    config: &WaitConfig,
    resource_name: &str,
    mut probe: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    let mut delays = ConstantBuilder::default()
        .with_delay(config.interval)
        .with_max_times(config.max_probes())
        .build();

    loop {
        if let Some(token) = &config.cancel {
            if token.is_cancelled() {
                return Err(WaitError::Cancelled {
                    resource: resource_name.to_string(),
                });
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            warn!(resource = %resource_name, attempts, "Wait deadline reached");
            return Err(WaitError::Timeout {
                resource: resource_name.to_string(),
                after: config.timeout,
                attempts,
            });
        }

        attempts += 1;
        match probe().await {
            Ok(Some(value)) => {
                debug!(resource = %resource_name, attempts, "Condition met");
                return Ok(value);
            }
            Ok(None) => {
                let remaining = config.timeout.saturating_sub(start.elapsed());
                let delay = delays.next().unwrap_or(config.interval).min(remaining);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Condition not met, polling again"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        match &config.cancel {
                            Some(token) => token.cancelled().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        return Err(WaitError::Cancelled {
                            resource: resource_name.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "Probe failed");
                return Err(WaitError::Failed {
                    resource: resource_name.to_string(),
                    message: format!("{e:#}"),
                });
            }
        }
    }
}
