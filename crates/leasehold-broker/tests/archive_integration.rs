//! Snapshot archival on return

mod common;

use common::{FakeArchive, FakePanel, Harness};
use leasehold_broker::archive::{BackupArchiver, DirectoryTransport};
use leasehold_broker::lease::ReturnOptions;
use leasehold_broker::remote::SnapshotId;
use leasehold_broker::{BrokerError, state};
use leasehold_common::LeaseStatus;
use std::sync::Arc;

fn archive_only() -> ReturnOptions {
    ReturnOptions {
        skip_archive: false,
        skip_reset: true,
    }
}

#[tokio::test]
async fn test_held_snapshots_archived_and_released() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("Harvest Fest").await;
    h.panel.add_snapshot("srv-a", "held-old", true, 20);
    h.panel.add_snapshot("srv-a", "held-new", true, 2);
    h.panel.clear_calls();

    let outcome = h
        .service
        .initiate_return(lease.id, archive_only())
        .await
        .unwrap();
    let report = outcome.archive.unwrap();

    // Two existing plus one fresh fits a quota of 3
    assert!(report.evicted.is_empty());
    assert_eq!(report.uploaded.len(), 3);
    assert_eq!(
        report.released,
        vec![SnapshotId::new("held-old"), SnapshotId::new("held-new")]
    );
    assert_eq!(report.folder, "2026-03-14_Harvest-Fest_lease-1");

    let stored = h.archive.stored();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|f| f.folder == report.folder));
    assert!(stored[2].file_name.ends_with("_return.tar.gz"));
    assert_eq!(stored[0].contents, "contents of held-old");

    let server = h.panel.server("srv-a");
    assert_eq!(server.snapshots.len(), 2);
    assert!(server.snapshots.iter().all(|s| !s.held));

    let calls = h.panel.calls();
    assert_eq!(h.panel.count_calls("delete_snapshot srv-a fresh-"), 1);
    assert_eq!(calls.last().unwrap(), "delete_snapshot srv-a fresh-1");
}

#[tokio::test]
async fn test_same_second_snapshots_get_distinct_files() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("週末イベント").await;
    h.panel.add_snapshot("srv-a", "bk-1", true, 1);
    h.panel.add_snapshot("srv-a", "bk-2", true, 1);
    h.panel.rename_snapshot("srv-a", "bk-1", "週末");
    h.panel.rename_snapshot("srv-a", "bk-2", "!!!");

    let report = h
        .service
        .initiate_return(lease.id, archive_only())
        .await
        .unwrap()
        .archive
        .unwrap();
    assert_eq!(report.uploaded.len(), 3);

    let mut names: Vec<String> = h.archive.stored().into_iter().map(|f| f.file_name).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 3);
    assert!(names.iter().any(|n| n.ends_with("_bk-1_週末.tar.gz")));
    assert!(names.iter().any(|n| n.ends_with("_bk-2.tar.gz")));
}

#[tokio::test]
async fn test_quota_exhausted_before_any_snapshot_is_taken() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("full").await;
    h.panel.add_snapshot("srv-a", "held-a", true, 3);
    h.panel.add_snapshot("srv-a", "held-b", true, 1);
    h.panel.add_snapshot("srv-a", "held-c", true, 0);
    h.panel.clear_calls();

    let err = h
        .service
        .initiate_return(lease.id, ReturnOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::QuotaExhausted {
            needed: 1,
            evictable: 0,
            ..
        }
    ));

    assert_eq!(h.panel.count_calls("create_snapshot"), 0);
    assert_eq!(h.panel.count_calls("delete_snapshot"), 0);
    assert_eq!(h.panel.count_calls("delete_all_files"), 0);
    assert!(h.archive.stored().is_empty());
    assert_eq!(
        h.service.get(lease.id).await.unwrap().status,
        LeaseStatus::Active
    );
}

#[tokio::test]
async fn test_quota_two_with_two_held_is_exhausted() {
    let panel = FakePanel::new();
    panel.add_server("srv-q", 2);
    panel.add_snapshot("srv-q", "held-a", true, 4);
    panel.add_snapshot("srv-q", "held-b", true, 1);

    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("quota two").await;

    let scratch = tempfile::tempdir().unwrap();
    let archiver = BackupArchiver::new(Arc::new(panel.clone()), Arc::new(FakeArchive::default()))
        .with_scratch_dir(scratch.path());

    assert!(matches!(
        archiver.archive("srv-q", &lease).await,
        Err(BrokerError::QuotaExhausted { .. })
    ));
    assert_eq!(panel.count_calls("create_snapshot"), 0);
    assert_eq!(panel.server("srv-q").snapshots.len(), 2);
}

#[tokio::test]
async fn test_oldest_unheld_snapshot_evicted_first() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("evict").await;
    h.panel.add_snapshot("srv-a", "held", true, 30);
    h.panel.add_snapshot("srv-a", "auto-old", false, 10);
    h.panel.add_snapshot("srv-a", "auto-new", false, 1);

    let report = h
        .service
        .initiate_return(lease.id, archive_only())
        .await
        .unwrap()
        .archive
        .unwrap();

    assert_eq!(report.evicted, vec![SnapshotId::new("auto-old")]);
    // Unheld snapshots are not archived
    assert_eq!(report.uploaded.len(), 2);

    let remaining: Vec<String> = h
        .panel
        .server("srv-a")
        .snapshots
        .iter()
        .map(|s| s.id.to_string())
        .collect();
    assert_eq!(remaining, vec!["held".to_string(), "auto-new".to_string()]);
}

#[tokio::test]
async fn test_transfer_failure_still_removes_fresh_snapshot() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("broken download").await;
    h.panel.fail("download_snapshot");

    let err = h
        .service
        .initiate_return(lease.id, ReturnOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::RemoteOperationFailed { .. }));

    assert_eq!(h.panel.count_calls("delete_snapshot srv-a fresh-1"), 1);
    assert!(h.panel.server("srv-a").snapshots.is_empty());

    // Nothing was wiped and the lease can be returned again
    assert_eq!(h.panel.count_calls("delete_all_files"), 0);
    let current = h.service.get(lease.id).await.unwrap();
    assert_eq!(current.status, LeaseStatus::Active);
    assert_eq!(current.assigned_resource_id.as_deref(), Some("srv-a"));

    h.panel.heal("download_snapshot");
    let outcome = h
        .service
        .initiate_return(lease.id, ReturnOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.lease.status, LeaseStatus::Returned);
}

#[tokio::test]
async fn test_incomplete_held_snapshot_skipped() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("partial").await;
    h.panel
        .add_snapshot_with("srv-a", "held-broken", true, 2, false);

    let report = h
        .service
        .initiate_return(lease.id, archive_only())
        .await
        .unwrap()
        .archive
        .unwrap();

    assert_eq!(report.skipped, vec![SnapshotId::new("held-broken")]);
    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.released, vec![SnapshotId::new("held-broken")]);
}

#[tokio::test]
async fn test_directory_transport_receives_archives() {
    let h = Harness::new(&[("alpha", "srv-a")]).await;
    let lease = h.active_lease("to disk").await;
    h.panel.add_snapshot("srv-a", "held", true, 1);

    let root = tempfile::tempdir().unwrap();
    let archiver = BackupArchiver::new(
        Arc::new(h.panel.clone()),
        Arc::new(DirectoryTransport::new(root.path())),
    );
    let lease = state::get_lease(&h.db, lease.id).await.unwrap().unwrap();
    let report = archiver.archive("srv-a", &lease).await.unwrap();

    let folder = root.path().join(&report.folder);
    let mut names: Vec<String> = std::fs::read_dir(&folder)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.ends_with("_held.tar.gz")));
    assert!(names.iter().any(|n| n.ends_with("_return.tar.gz")));
}
