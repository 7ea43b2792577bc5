//! Durable archive transports

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copies local archive files into durable storage.
pub trait ArchiveTransport: Send + Sync {
    /// Store `local_path` under `remote_folder`, keeping its file name.
    /// Returns the stored location.
    fn upload(
        &self,
        local_path: &Path,
        remote_folder: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// File name component of `path`
pub(crate) fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Archive path {} has no usable file name", path.display()))
}

/// Archives into a local (or mounted) directory tree
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    root: PathBuf,
}

impl DirectoryTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArchiveTransport for DirectoryTransport {
    async fn upload(&self, local_path: &Path, remote_folder: &str) -> Result<String> {
        let folder = self.root.join(remote_folder);
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("Failed to create {}", folder.display()))?;

        let dest = folder.join(file_name(local_path)?);
        let bytes = tokio::fs::copy(local_path, &dest)
            .await
            .with_context(|| format!("Failed to copy archive to {}", dest.display()))?;

        debug!(dest = %dest.display(), bytes, "Archive stored");
        Ok(dest.display().to_string())
    }
}
