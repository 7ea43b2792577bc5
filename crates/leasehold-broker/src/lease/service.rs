//! Lease lifecycle
//!
//! `pending -> active -> returned` and `pending -> rejected`. Every operation
//! checks the persisted status first and fails with `InvalidState` before
//! any side effect. Remote work runs before the transition write, so a
//! failure leaves the lease where it was and the operation can be retried.

use super::attrs::{LeaseRequest, validate_duration};
use crate::allocator::Allocator;
use crate::archive::{ArchiveReport, ArchiveTransport, BackupArchiver};
use crate::clock::Clock;
use crate::config::LeaseConfig;
use crate::error::{BrokerError, Result, ValidationError};
use crate::notify::{self, Notification, Notifier};
use crate::remote::{PowerSignal, RemoteControl};
use crate::state::{self, DbPool, Lease, PrincipalId};
use chrono::{DateTime, Duration, Utc};
use leasehold_common::LeaseStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

/// Flags for [`LeaseService::initiate_return`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnOptions {
    /// Do not snapshot or archive anything
    pub skip_archive: bool,
    /// Leave the server's files and process alone
    pub skip_reset: bool,
}

#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub lease: Lease,
    pub archive: Option<ArchiveReport>,
}

/// Result of one overdue sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverdueSweep {
    pub notified: usize,
    pub returned: usize,
    pub failed: usize,
}

/// Drives lease transitions against the pool, the panel and the archive.
pub struct LeaseService<R, T> {
    db: DbPool,
    allocator: Allocator,
    remote: Arc<R>,
    archiver: BackupArchiver<R, T>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
    locks: LockMap,
}

type LockMap = Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive hold on one lease; drops its map entry when nobody waits
struct LeaseGuard<'a> {
    locks: &'a LockMap,
    lease_id: i64,
    guard: OwnedMutexGuard<()>,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in this guard
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.lease_id);
        }
    }
}

fn require(lease: &Lease, expected: LeaseStatus, operation: &'static str) -> Result<()> {
    if lease.status == expected {
        Ok(())
    } else {
        Err(BrokerError::InvalidState {
            lease_id: lease.id,
            operation,
            actual: lease.status,
        })
    }
}

impl<R, T> LeaseService<R, T>
where
    R: RemoteControl,
    T: ArchiveTransport,
{
    pub fn new(
        db: DbPool,
        remote: Arc<R>,
        archiver: BackupArchiver<R, T>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: LeaseConfig,
    ) -> Self {
        Self {
            allocator: Allocator::new(db.clone()),
            db,
            remote,
            archiver,
            notifier,
            clock,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Serialize operations on one lease within this process
    async fn lock_lease(&self, lease_id: i64) -> LeaseGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(lease_id).or_default())
        };
        LeaseGuard {
            locks: &self.locks,
            lease_id,
            guard: lock.lock_owned().await,
        }
    }

    async fn load(&self, lease_id: i64) -> Result<Lease> {
        state::get_lease(&self.db, lease_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("lease", lease_id))
    }

    /// Error for a conditional write that did not apply
    async fn lost_transition(&self, lease_id: i64, operation: &'static str) -> BrokerError {
        match self.load(lease_id).await {
            Ok(lease) => BrokerError::InvalidState {
                lease_id,
                operation,
                actual: lease.status,
            },
            Err(e) => e,
        }
    }

    fn notify(&self, notification: Notification) {
        notify::deliver(self.notifier.as_ref(), notification);
    }

    pub async fn get(&self, lease_id: i64) -> Result<Lease> {
        self.load(lease_id).await
    }

    pub async fn list(&self, status: Option<LeaseStatus>) -> Result<Vec<Lease>> {
        Ok(match status {
            Some(status) => state::leases_by_status(&self.db, status).await?,
            None => state::list_leases(&self.db).await?,
        })
    }

    /// Validate and persist a new pending lease
    pub async fn create(
        &self,
        requester_id: &PrincipalId,
        owner_id: &PrincipalId,
        request: &LeaseRequest,
    ) -> Result<Lease> {
        let attrs = request.validate(self.config.max_duration_days)?;
        let lease_id =
            state::insert_lease(&self.db, requester_id, owner_id, &attrs, self.clock.now()).await?;

        info!(lease_id, name = %attrs.name, requester = %requester_id, "Lease requested");
        self.notify(Notification::LeaseRequested {
            lease_id,
            name: attrs.name.clone(),
            requester_id: requester_id.to_string(),
        });

        self.load(lease_id).await
    }

    /// Assign a free resource, provision it unless `skip_reset`, and
    /// activate the lease.
    pub async fn approve(&self, lease_id: i64, skip_reset: bool) -> Result<Lease> {
        let _guard = self.lock_lease(lease_id).await;
        let lease = self.load(lease_id).await?;
        require(&lease, LeaseStatus::Pending, "approve")?;

        let reservation = self
            .allocator
            .reserve_available()
            .await?
            .ok_or(BrokerError::ResourceExhausted { lease_id })?;
        let server_id = reservation.physical_id.clone();
        info!(lease_id, resource = %reservation.alias, skip_reset, "Approving lease");

        if !skip_reset {
            self.provision(&server_id, &lease).await?;
        }

        let start_at = self.clock.now();
        let end_at = start_at + Duration::days(lease.desired_duration_days);
        if !state::claim_resource(&self.db, lease_id, &server_id, start_at, end_at).await? {
            let current = self.load(lease_id).await?;
            require(&current, LeaseStatus::Pending, "approve")?;
            warn!(lease_id, resource = %reservation.alias, "Resource claimed by another lease");
            return Err(BrokerError::ResourceExhausted { lease_id });
        }
        let alias = reservation.alias.clone();
        drop(reservation);

        info!(lease_id, resource = %alias, end_at = %end_at, "Lease active");
        self.notify(Notification::LeaseApproved {
            lease_id,
            resource: alias,
            end_at,
        });

        self.load(lease_id).await
    }

    /// Kill, configure and reinstall a server for a new lease
    async fn provision(&self, server_id: &str, lease: &Lease) -> Result<()> {
        self.power_off(server_id).await?;

        if let Some(tag) = &lease.version_tag {
            self.remote
                .set_version(server_id, tag)
                .await
                .map_err(|e| BrokerError::remote("set version", e))?;
        }
        if let Some(image) = &self.config.container_image {
            self.remote
                .set_image(server_id, image)
                .await
                .map_err(|e| BrokerError::remote("set image", e))?;
        }

        let install = self
            .remote
            .reinstall(server_id)
            .await
            .map_err(|e| BrokerError::remote("reinstall", e))?;
        install.wait().await?;

        info!(lease_id = lease.id, server_id, "Server provisioned");
        Ok(())
    }

    async fn power_off(&self, server_id: &str) -> Result<()> {
        let op = self
            .remote
            .power(server_id, PowerSignal::Kill)
            .await
            .map_err(|e| BrokerError::remote("power off", e))?;
        op.wait().await?;
        Ok(())
    }

    pub async fn reject(&self, lease_id: i64) -> Result<Lease> {
        let _guard = self.lock_lease(lease_id).await;
        let lease = self.load(lease_id).await?;
        require(&lease, LeaseStatus::Pending, "reject")?;

        if !state::reject_lease(&self.db, lease_id).await? {
            return Err(self.lost_transition(lease_id, "reject").await);
        }

        info!(lease_id, "Lease rejected");
        self.notify(Notification::LeaseRejected { lease_id });
        self.load(lease_id).await
    }

    /// Change a lease's length.
    ///
    /// Pending leases get a new requested duration. Active leases keep it
    /// and only move `end_at` to `days` after they started; that end must
    /// still be in the future.
    pub async fn extend(&self, lease_id: i64, days: i64) -> Result<Lease> {
        let _guard = self.lock_lease(lease_id).await;
        let lease = self.load(lease_id).await?;

        let end_at = match lease.status {
            LeaseStatus::Pending => {
                validate_duration(days, self.config.max_duration_days)?;
                if !state::set_duration(&self.db, lease_id, days).await? {
                    return Err(self.lost_transition(lease_id, "extend").await);
                }
                None
            }
            LeaseStatus::Active => {
                validate_duration(days, self.config.max_duration_days)?;
                let now = self.clock.now();
                let start_at = lease.start_at.unwrap_or(now);
                let end_at = start_at + Duration::days(days);
                if end_at <= now {
                    return Err(ValidationError::EndInPast { end: end_at }.into());
                }
                if !state::set_end(&self.db, lease_id, end_at).await? {
                    return Err(self.lost_transition(lease_id, "extend").await);
                }
                Some(end_at)
            }
            actual => {
                return Err(BrokerError::InvalidState {
                    lease_id,
                    operation: "extend",
                    actual,
                });
            }
        };

        info!(lease_id, days, "Lease extended");
        self.notify(Notification::LeaseExtended {
            lease_id,
            days,
            end_at,
        });
        self.load(lease_id).await
    }

    /// Archive, wipe and release an active lease's resource.
    pub async fn initiate_return(
        &self,
        lease_id: i64,
        options: ReturnOptions,
    ) -> Result<ReturnOutcome> {
        let _guard = self.lock_lease(lease_id).await;
        let lease = self.load(lease_id).await?;
        require(&lease, LeaseStatus::Active, "return")?;

        let server_id = lease
            .assigned_resource_id
            .clone()
            .ok_or_else(|| BrokerError::not_found("assigned resource for lease", lease_id))?;
        let alias = self
            .allocator
            .reverse_lookup(&server_id)
            .await?
            .unwrap_or_else(|| server_id.clone());
        info!(lease_id, resource = %alias, ?options, "Returning lease");

        let archive = if options.skip_archive {
            None
        } else {
            Some(self.archiver.archive(&server_id, &lease).await?)
        };

        if !options.skip_reset {
            self.power_off(&server_id).await?;
            self.remote
                .delete_all_files(&server_id)
                .await
                .map_err(|e| BrokerError::remote("delete files", e))?;
            info!(lease_id, server_id, "Server wiped");
        }

        if !state::mark_returned(&self.db, lease_id, self.clock.now()).await? {
            return Err(self.lost_transition(lease_id, "return").await);
        }

        info!(lease_id, resource = %alias, "Lease returned");
        self.notify(Notification::LeaseReturned {
            lease_id,
            resource: alias,
            archive_folder: archive.as_ref().map(|a| a.folder.clone()),
        });

        Ok(ReturnOutcome {
            lease: self.load(lease_id).await?,
            archive,
        })
    }

    /// Remind owners of active leases ending within `window`, once each
    pub async fn send_return_reminders(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize> {
        let mut sent = 0;
        for lease in state::leases_by_status(&self.db, LeaseStatus::Active).await? {
            let Some(end_at) = lease.end_at else { continue };
            if lease.reminded(window) || end_at <= now || end_at > now + window {
                continue;
            }
            if !state::mark_reminder_sent(&self.db, lease.id, lease.reminder_sent_at, now).await? {
                continue;
            }

            self.notify(Notification::ReturnReminder {
                lease_id: lease.id,
                owner_id: lease.owner_id.to_string(),
                end_at,
            });
            sent += 1;
        }

        if sent > 0 {
            info!(count = sent, "Return reminders sent");
        }
        Ok(sent)
    }

    /// Flag active leases past their end, returning them when `auto_return`
    pub async fn sweep_overdue(&self, now: DateTime<Utc>, auto_return: bool) -> Result<OverdueSweep> {
        let mut sweep = OverdueSweep::default();

        for lease in state::leases_by_status(&self.db, LeaseStatus::Active).await? {
            if !lease.is_overdue(now) {
                continue;
            }

            if !lease.overdue_notified()
                && state::mark_overdue_notified(&self.db, lease.id, lease.overdue_notified_at, now)
                    .await?
            {
                warn!(lease_id = lease.id, end_at = ?lease.end_at, "Lease overdue");
                self.notify(Notification::LeaseOverdue {
                    lease_id: lease.id,
                    owner_id: lease.owner_id.to_string(),
                    end_at: lease.end_at.unwrap_or(now),
                });
                sweep.notified += 1;
            }

            if auto_return {
                match self.initiate_return(lease.id, ReturnOptions::default()).await {
                    Ok(_) => sweep.returned += 1,
                    Err(e) => {
                        warn!(
                            lease_id = lease.id,
                            retryable = e.is_retryable(),
                            error = %e,
                            "Automatic return failed"
                        );
                        sweep.failed += 1;
                    }
                }
            }
        }

        Ok(sweep)
    }
}
