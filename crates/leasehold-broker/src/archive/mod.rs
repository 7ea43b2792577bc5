//! Archival of server snapshots to durable storage
//!
//! [`BackupArchiver`] drives the panel; [`ArchiveTransport`] implementations
//! store the files. [`AnyTransport`] picks one from configuration.

mod naming;
mod orchestrator;
mod s3;
mod transport;

pub use naming::{archive_file_name, archive_folder, return_snapshot_name, sanitize};
pub use orchestrator::{ArchiveReport, BackupArchiver, plan_eviction};
pub use s3::S3Transport;
pub use transport::{ArchiveTransport, DirectoryTransport};

use crate::config::{ArchiveBackend, ArchiveConfig};
use anyhow::Result;
use std::path::Path;

/// Transport selected at startup
#[derive(Clone)]
pub enum AnyTransport {
    S3(S3Transport),
    Directory(DirectoryTransport),
}

impl AnyTransport {
    pub async fn from_config(config: &ArchiveConfig) -> Self {
        match &config.backend {
            ArchiveBackend::S3 {
                bucket,
                prefix,
                region,
            } => Self::S3(S3Transport::new(bucket, prefix, region).await),
            ArchiveBackend::Directory { root } => Self::Directory(DirectoryTransport::new(root)),
        }
    }
}

impl ArchiveTransport for AnyTransport {
    async fn upload(&self, local_path: &Path, remote_folder: &str) -> Result<String> {
        match self {
            Self::S3(t) => t.upload(local_path, remote_folder).await,
            Self::Directory(t) => t.upload(local_path, remote_folder).await,
        }
    }
}
