//! Snapshot archival for returned leases
//!
//! Order of operations on one server:
//! 1. list snapshots and read the quota (concurrently)
//! 2. evict the oldest unheld snapshots to make room for one more
//! 3. take a fresh snapshot and wait for it
//! 4. download each held snapshot plus the fresh one, upload to the archive
//! 5. release the holds taken before step 1
//!
//! The fresh snapshot is always deleted afterwards, whatever happened.

use super::naming::{archive_file_name, archive_folder, return_snapshot_name};
use super::transport::ArchiveTransport;
use crate::error::{BrokerError, Result};
use crate::remote::{RemoteControl, Snapshot, SnapshotId};
use crate::state::Lease;
use crate::tracker::PendingOperation;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Label used for the snapshot taken at return time
const RETURN_LABEL: &str = "return";

/// What an archival run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Archive folder every file went into
    pub folder: String,
    /// Stored locations, in upload order
    pub uploaded: Vec<String>,
    /// Unheld snapshots deleted to make room
    pub evicted: Vec<SnapshotId>,
    /// Held snapshots whose hold was cleared
    pub released: Vec<SnapshotId>,
    /// Held snapshots skipped because they never completed
    pub skipped: Vec<SnapshotId>,
}

/// Pick the snapshots to delete so one more fits under `quota`.
///
/// Oldest unheld first. Fails without side effects when there are not
/// enough unheld snapshots.
pub fn plan_eviction(
    resource: &str,
    snapshots: &[Snapshot],
    quota: usize,
) -> Result<Vec<SnapshotId>> {
    let needed = (snapshots.len() + 1).saturating_sub(quota);
    if needed == 0 {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<&Snapshot> = snapshots.iter().filter(|s| !s.held).collect();
    if candidates.len() < needed {
        return Err(BrokerError::QuotaExhausted {
            resource: resource.to_string(),
            needed,
            evictable: candidates.len(),
        });
    }

    candidates.sort_by_key(|s| s.created_at);
    Ok(candidates
        .into_iter()
        .take(needed)
        .map(|s| s.id.clone())
        .collect())
}

/// Archives a server's snapshots to durable storage.
pub struct BackupArchiver<R, T> {
    remote: Arc<R>,
    transport: Arc<T>,
    scratch_dir: Option<PathBuf>,
}

impl<R, T> BackupArchiver<R, T>
where
    R: RemoteControl,
    T: ArchiveTransport,
{
    pub fn new(remote: Arc<R>, transport: Arc<T>) -> Self {
        Self {
            remote,
            transport,
            scratch_dir: None,
        }
    }

    /// Download into `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Archive everything worth keeping from `server_id` for `lease`.
    pub async fn archive(&self, server_id: &str, lease: &Lease) -> Result<ArchiveReport> {
        info!(lease_id = lease.id, server_id, "Archiving snapshots");

        let (snapshots, quota) = futures::try_join!(
            self.remote.list_snapshots(server_id),
            self.remote.snapshot_quota(server_id),
        )
        .map_err(|e| BrokerError::remote("inspect snapshots", e))?;

        let evicted = plan_eviction(server_id, &snapshots, quota)?;
        for id in &evicted {
            self.remote
                .delete_snapshot(server_id, id)
                .await
                .map_err(|e| BrokerError::remote("evict snapshot", e))?;
            debug!(server_id, snapshot = %id, "Evicted snapshot");
        }

        let held: Vec<Snapshot> = snapshots.into_iter().filter(|s| s.held).collect();

        let pending = self
            .remote
            .create_snapshot(server_id, &return_snapshot_name(lease.id))
            .await
            .map_err(|e| BrokerError::remote("create snapshot", e))?;
        let transient = pending.response().clone();

        let result = self
            .transfer_and_release(server_id, lease, &held, &pending)
            .await;

        // Cleanup runs whatever the transfer outcome
        if let Err(e) = self.remote.delete_snapshot(server_id, &transient).await {
            warn!(
                server_id,
                snapshot = %transient,
                error = ?e,
                "Failed to delete transient snapshot"
            );
        }

        let mut report = result?;
        report.evicted = evicted;
        info!(
            lease_id = lease.id,
            folder = %report.folder,
            uploaded = report.uploaded.len(),
            evicted = report.evicted.len(),
            released = report.released.len(),
            "Archive complete"
        );
        Ok(report)
    }

    async fn transfer_and_release(
        &self,
        server_id: &str,
        lease: &Lease,
        held: &[Snapshot],
        pending: &PendingOperation<SnapshotId, Snapshot>,
    ) -> Result<ArchiveReport> {
        let fresh = pending.wait().await?;

        let mut report = ArchiveReport {
            folder: archive_folder(lease),
            ..Default::default()
        };

        let mut targets: Vec<(&Snapshot, &str)> = Vec::with_capacity(held.len() + 1);
        for snapshot in held {
            if snapshot.is_archivable() {
                targets.push((snapshot, snapshot.name.as_str()));
            } else {
                warn!(
                    server_id,
                    snapshot = %snapshot.id,
                    "Held snapshot never completed, not archiving it"
                );
                report.skipped.push(snapshot.id.clone());
            }
        }
        targets.push((&fresh, RETURN_LABEL));

        let scratch = self.scratch().await?;
        for (snapshot, label) in targets {
            let location = self
                .transfer_one(server_id, scratch.path(), &report.folder, snapshot, label)
                .await?;
            report.uploaded.push(location);
        }

        for snapshot in held {
            match self.remote.toggle_hold(server_id, &snapshot.id).await {
                Ok(()) => report.released.push(snapshot.id.clone()),
                Err(e) => warn!(
                    server_id,
                    snapshot = %snapshot.id,
                    error = ?e,
                    "Failed to release snapshot hold"
                ),
            }
        }

        Ok(report)
    }

    async fn scratch(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("leasehold-");

        let dir = match &self.scratch_dir {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Download one snapshot, upload it, and remove the local copy
    async fn transfer_one(
        &self,
        server_id: &str,
        scratch: &Path,
        folder: &str,
        snapshot: &Snapshot,
        label: &str,
    ) -> Result<String> {
        let local = scratch.join(archive_file_name(snapshot, Some(label)));

        let result = async {
            let bytes = self
                .remote
                .download_snapshot(server_id, &snapshot.id, &local)
                .await
                .map_err(|e| BrokerError::remote("download snapshot", e))?;

            let location = self
                .transport
                .upload(&local, folder)
                .await
                .map_err(|e| BrokerError::remote("upload archive", e))?;

            info!(server_id, snapshot = %snapshot.id, bytes, location = %location, "Snapshot archived");
            Ok::<_, BrokerError>(location)
        }
        .await;

        match tokio::fs::remove_file(&local).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %local.display(), error = ?e, "Failed to remove scratch file"),
        }

        result
    }
}
