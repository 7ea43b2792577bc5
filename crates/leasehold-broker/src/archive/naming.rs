//! Deterministic archive names
//!
//! Folder: `{event_date}_{lease-name}_lease-{id}`.
//! File: `{created %Y-%m-%dT%H-%M-%SZ}_{snapshot-id}[_{label}].tar.gz`.
//! The snapshot id keeps names unique when two snapshots share a second.

use crate::remote::Snapshot;
use crate::state::Lease;

/// Keep letters, digits, `_` and `-`; fold everything else into single dashes
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Archive folder for everything taken from one lease
pub fn archive_folder(lease: &Lease) -> String {
    let name = sanitize(&lease.name);
    let name = if name.is_empty() { "lease".to_string() } else { name };
    format!("{}_{}_lease-{}", lease.event_date, name, lease.id)
}

pub fn archive_file_name(snapshot: &Snapshot, label: Option<&str>) -> String {
    let stamp = snapshot.created_at.format("%Y-%m-%dT%H-%M-%SZ");
    let id = sanitize(snapshot.id.as_str());
    match label.map(sanitize).filter(|l| !l.is_empty()) {
        Some(label) => format!("{stamp}_{id}_{label}.tar.gz"),
        None => format!("{stamp}_{id}.tar.gz"),
    }
}

/// Name of the snapshot taken when a lease is returned
pub fn return_snapshot_name(lease_id: i64) -> String {
    format!("lease-{lease_id}-return")
}
