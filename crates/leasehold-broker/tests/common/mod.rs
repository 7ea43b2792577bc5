//! Shared fixtures for broker integration tests
//!
//! In-memory stand-ins for the panel, the archive store, the notifier and
//! the clock, plus a [`Harness`] that wires them into a `LeaseService`.

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use leasehold_broker::archive::{ArchiveTransport, BackupArchiver};
use leasehold_broker::clock::Clock;
use leasehold_broker::config::LeaseConfig;
use leasehold_broker::lease::{LeaseRequest, LeaseService};
use leasehold_broker::notify::{Notification, Notifier};
use leasehold_broker::remote::{
    InstallStatus, PowerSignal, RemoteControl, ServerState, Snapshot, SnapshotId,
};
use leasehold_broker::state::{self, DbPool, Lease, PrincipalId};
use leasehold_broker::tracker::PendingOperation;
use leasehold_broker::wait::WaitConfig;
use leasehold_common::VersionTag;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type TestService = LeaseService<FakePanel, FakeArchive>;

/// Fixed start of every test timeline
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
pub struct FakeServer {
    pub state: ServerState,
    pub quota: usize,
    pub snapshots: Vec<Snapshot>,
    pub files: Vec<String>,
    pub version: Option<String>,
    pub image: Option<String>,
}

#[derive(Default)]
struct PanelInner {
    servers: HashMap<String, FakeServer>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
    next_snapshot: u32,
}

/// Panel double that records every call in order.
///
/// Operations named in [`FakePanel::fail`] return an error before touching
/// any state.
#[derive(Clone, Default)]
pub struct FakePanel {
    inner: Arc<Mutex<PanelInner>>,
}

impl FakePanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, server_id: &str, quota: usize) {
        self.inner.lock().unwrap().servers.insert(
            server_id.to_string(),
            FakeServer {
                state: ServerState::Running,
                quota,
                snapshots: Vec::new(),
                files: vec!["world".to_string(), "server.properties".to_string()],
                version: None,
                image: None,
            },
        );
    }

    /// Seed an existing snapshot, `age_days` old at [`t0`]
    pub fn add_snapshot(&self, server_id: &str, id: &str, held: bool, age_days: i64) {
        self.add_snapshot_with(server_id, id, held, age_days, true);
    }

    pub fn add_snapshot_with(
        &self,
        server_id: &str,
        id: &str,
        held: bool,
        age_days: i64,
        completed: bool,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let server = inner.servers.get_mut(server_id).unwrap();
        server.snapshots.push(Snapshot {
            id: SnapshotId::new(id),
            name: id.to_string(),
            held,
            created_at: t0() - Duration::days(age_days),
            size_bytes: 64,
            completed,
            successful: completed,
        });
    }

    pub fn rename_snapshot(&self, server_id: &str, id: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let server = inner.servers.get_mut(server_id).unwrap();
        let snapshot = server
            .snapshots
            .iter_mut()
            .find(|s| s.id.as_str() == id)
            .unwrap();
        snapshot.name = name.to_string();
    }

    pub fn fail(&self, operation: &'static str) {
        self.inner.lock().unwrap().failing.insert(operation);
    }

    pub fn heal(&self, operation: &'static str) {
        self.inner.lock().unwrap().failing.remove(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn server(&self, server_id: &str) -> FakeServer {
        self.inner.lock().unwrap().servers[server_id].clone()
    }

    fn record(&self, operation: &'static str, detail: String) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("{operation} {detail}"));
        if inner.failing.contains(operation) {
            anyhow::bail!("injected {operation} failure");
        }
        Ok(())
    }

    fn with_server<T>(
        &self,
        server_id: &str,
        f: impl FnOnce(&mut FakeServer) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut inner = self.inner.lock().unwrap();
        let server = inner
            .servers
            .get_mut(server_id)
            .ok_or_else(|| anyhow::anyhow!("unknown server {server_id}"))?;
        f(server)
    }
}

fn fast_wait() -> WaitConfig {
    WaitConfig::new(
        std::time::Duration::from_millis(5),
        std::time::Duration::from_millis(200),
    )
}

impl RemoteControl for FakePanel {
    async fn power(
        &self,
        server_id: &str,
        signal: PowerSignal,
    ) -> anyhow::Result<PendingOperation<(), ServerState>> {
        self.record("power", format!("{server_id} {signal}"))?;
        let target = signal.target_state();
        self.with_server(server_id, |s| {
            s.state = target;
            Ok(())
        })?;
        Ok(PendingOperation::ready(format!("{server_id} {signal}"), (), target))
    }

    async fn list_snapshots(&self, server_id: &str) -> anyhow::Result<Vec<Snapshot>> {
        self.record("list_snapshots", server_id.to_string())?;
        self.with_server(server_id, |s| Ok(s.snapshots.clone()))
    }

    async fn snapshot_quota(&self, server_id: &str) -> anyhow::Result<usize> {
        self.with_server(server_id, |s| Ok(s.quota))
    }

    async fn create_snapshot(
        &self,
        server_id: &str,
        name: &str,
    ) -> anyhow::Result<PendingOperation<SnapshotId, Snapshot>> {
        self.record("create_snapshot", format!("{server_id} {name}"))?;

        let id = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_snapshot += 1;
            SnapshotId::new(format!("fresh-{}", inner.next_snapshot))
        };
        let snapshot = Snapshot {
            id: id.clone(),
            name: name.to_string(),
            held: false,
            created_at: t0(),
            size_bytes: 128,
            completed: true,
            successful: true,
        };
        self.with_server(server_id, |s| {
            if s.snapshots.len() >= s.quota {
                anyhow::bail!("snapshot limit reached");
            }
            s.snapshots.push(snapshot);
            Ok(())
        })?;

        let panel = self.clone();
        let server = server_id.to_string();
        let probe_id = id.clone();
        PendingOperation::issue(
            format!("snapshot {id}"),
            fast_wait(),
            || async { Ok::<_, anyhow::Error>(id) },
            move || {
                let panel = panel.clone();
                let server = server.clone();
                let id = probe_id.clone();
                async move {
                    panel.with_server(&server, |s| {
                        s.snapshots
                            .iter()
                            .find(|snap| snap.id == id)
                            .cloned()
                            .ok_or_else(|| anyhow::anyhow!("snapshot {id} vanished"))
                    })
                }
            },
            |snapshot: &Snapshot| Ok(snapshot.completed),
        )
        .await
    }

    async fn download_snapshot(
        &self,
        server_id: &str,
        snapshot: &SnapshotId,
        dest: &Path,
    ) -> anyhow::Result<u64> {
        self.record("download_snapshot", format!("{server_id} {snapshot}"))?;
        let body = format!("contents of {snapshot}");
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }

    async fn delete_snapshot(&self, server_id: &str, snapshot: &SnapshotId) -> anyhow::Result<()> {
        self.record("delete_snapshot", format!("{server_id} {snapshot}"))?;
        self.with_server(server_id, |s| {
            s.snapshots.retain(|snap| &snap.id != snapshot);
            Ok(())
        })
    }

    async fn toggle_hold(&self, server_id: &str, snapshot: &SnapshotId) -> anyhow::Result<()> {
        self.record("toggle_hold", format!("{server_id} {snapshot}"))?;
        self.with_server(server_id, |s| {
            let snap = s
                .snapshots
                .iter_mut()
                .find(|snap| &snap.id == snapshot)
                .ok_or_else(|| anyhow::anyhow!("no snapshot {snapshot}"))?;
            snap.held = !snap.held;
            Ok(())
        })
    }

    async fn delete_all_files(&self, server_id: &str) -> anyhow::Result<()> {
        self.record("delete_all_files", server_id.to_string())?;
        self.with_server(server_id, |s| {
            s.files.clear();
            Ok(())
        })
    }

    async fn reinstall(
        &self,
        server_id: &str,
    ) -> anyhow::Result<PendingOperation<(), InstallStatus>> {
        self.record("reinstall", server_id.to_string())?;
        self.with_server(server_id, |s| {
            s.files = vec!["server.properties".to_string()];
            Ok(())
        })?;
        Ok(PendingOperation::ready(
            format!("reinstall {server_id}"),
            (),
            InstallStatus::Installed,
        ))
    }

    async fn set_version(&self, server_id: &str, tag: &VersionTag) -> anyhow::Result<()> {
        self.record("set_version", format!("{server_id} {tag}"))?;
        self.with_server(server_id, |s| {
            s.version = Some(tag.to_string());
            Ok(())
        })
    }

    async fn set_image(&self, server_id: &str, image: &str) -> anyhow::Result<()> {
        self.record("set_image", format!("{server_id} {image}"))?;
        self.with_server(server_id, |s| {
            s.image = Some(image.to_string());
            Ok(())
        })
    }
}

/// One stored archive file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub folder: String,
    pub file_name: String,
    pub contents: String,
}

/// Archive store that keeps uploads in memory
#[derive(Clone, Default)]
pub struct FakeArchive {
    stored: Arc<Mutex<Vec<StoredFile>>>,
}

impl FakeArchive {
    pub fn stored(&self) -> Vec<StoredFile> {
        self.stored.lock().unwrap().clone()
    }
}

impl ArchiveTransport for FakeArchive {
    async fn upload(&self, local_path: &Path, remote_folder: &str) -> anyhow::Result<String> {
        let contents = tokio::fs::read_to_string(local_path).await?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("no file name"))?
            .to_string();

        let location = format!("memory://{remote_folder}/{file_name}");
        self.stored.lock().unwrap().push(StoredFile {
            folder: remote_folder.to_string(),
            file_name,
            contents,
        });
        Ok(location)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(Notification::kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Clock that only moves when told to
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A lease service over fakes, with `resources` in the pool
pub struct Harness {
    pub db: DbPool,
    pub panel: FakePanel,
    pub archive: FakeArchive,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
    pub service: Arc<TestService>,
    _scratch: tempfile::TempDir,
}

impl Harness {
    /// `resources` are `(alias, physical_id)`; every server gets a
    /// snapshot quota of 3
    pub async fn new(resources: &[(&str, &str)]) -> Self {
        Self::with_config(resources, LeaseConfig::default()).await
    }

    pub async fn with_config(resources: &[(&str, &str)], config: LeaseConfig) -> Self {
        let db = leasehold_test_utils::open_test_db().await.unwrap();
        state::setup_schema(&db).await.unwrap();

        let panel = FakePanel::new();
        let archive = FakeArchive::default();
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(FixedClock::new(t0()));
        let scratch = tempfile::tempdir().unwrap();

        let remote = Arc::new(panel.clone());
        let archiver = BackupArchiver::new(Arc::clone(&remote), Arc::new(archive.clone()))
            .with_scratch_dir(scratch.path());
        let service = LeaseService::new(
            db.clone(),
            remote,
            archiver,
            notifier.clone(),
            clock.clone(),
            config,
        );

        for (alias, physical_id) in resources {
            service.allocator().add(alias, physical_id).await.unwrap();
            panel.add_server(physical_id, 3);
        }

        Self {
            db,
            panel,
            archive,
            notifier,
            clock,
            service: Arc::new(service),
            _scratch: scratch,
        }
    }

    /// Create a pending lease with the stock request
    pub async fn pending_lease(&self, name: &str) -> Lease {
        self.service
            .create(&requester(), &owner(), &request(name))
            .await
            .unwrap()
    }

    /// Create and approve a lease
    pub async fn active_lease(&self, name: &str) -> Lease {
        let lease = self.pending_lease(name).await;
        self.service.approve(lease.id, false).await.unwrap()
    }
}

pub fn requester() -> PrincipalId {
    PrincipalId::new("u-requester")
}

pub fn owner() -> PrincipalId {
    PrincipalId::new("u-owner")
}

/// Seven-day lease on version 1.20.4 with one collaborator
pub fn request(name: &str) -> LeaseRequest {
    LeaseRequest {
        name: name.to_string(),
        duration_days: 7,
        event_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        version_tag: Some("1.20.4".to_string()),
        description: Some("spring build event".to_string()),
        collaborators: vec!["u-collab".to_string()],
    }
}
