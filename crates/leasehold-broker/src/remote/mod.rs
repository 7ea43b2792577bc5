//! Remote control of panel-hosted servers
//!
//! [`RemoteControl`] is the seam the lease service and archiver talk to.
//! Long-running operations return a [`PendingOperation`] whose completion is
//! observed by polling.

mod error;
mod panel;
mod types;

pub use error::{PanelError, classify_anyhow_error};
pub use panel::PanelClient;
pub use types::{InstallStatus, PowerSignal, ServerState, Snapshot, SnapshotId};

use crate::tracker::PendingOperation;
use anyhow::Result;
use leasehold_common::VersionTag;
use std::future::Future;
use std::path::Path;

/// Operations against one panel.
///
/// `server_id` is always the physical id. Errors carry context for the
/// operation that failed.
pub trait RemoteControl: Send + Sync {
    /// Send a power signal; completes when the server reaches the signal's
    /// target state
    fn power(
        &self,
        server_id: &str,
        signal: PowerSignal,
    ) -> impl Future<Output = Result<PendingOperation<(), ServerState>>> + Send;

    fn list_snapshots(&self, server_id: &str) -> impl Future<Output = Result<Vec<Snapshot>>> + Send;

    /// Maximum number of snapshots the server may keep
    fn snapshot_quota(&self, server_id: &str) -> impl Future<Output = Result<usize>> + Send;

    /// Start a snapshot; the id is known immediately, completion is polled
    fn create_snapshot(
        &self,
        server_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<PendingOperation<SnapshotId, Snapshot>>> + Send;

    /// Write the snapshot archive to `dest`, returning bytes written
    fn download_snapshot(
        &self,
        server_id: &str,
        snapshot: &SnapshotId,
        dest: &Path,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn delete_snapshot(
        &self,
        server_id: &str,
        snapshot: &SnapshotId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Flip the held flag of a snapshot
    fn toggle_hold(
        &self,
        server_id: &str,
        snapshot: &SnapshotId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove every file in the server's root directory
    fn delete_all_files(&self, server_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Start a reinstall; completes when the install succeeds
    fn reinstall(
        &self,
        server_id: &str,
    ) -> impl Future<Output = Result<PendingOperation<(), InstallStatus>>> + Send;

    fn set_version(
        &self,
        server_id: &str,
        tag: &VersionTag,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_image(&self, server_id: &str, image: &str) -> impl Future<Output = Result<()>> + Send;
}
