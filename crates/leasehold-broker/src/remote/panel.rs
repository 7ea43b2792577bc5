//! HTTP client for the panel's client API
//!
//! Idempotent requests (GET, PUT, DELETE) are retried with exponential
//! backoff on rate limits, 5xx and transport failures. Requests that start
//! work on the panel (power, snapshot, reinstall, hold toggle) are sent once.

use super::RemoteControl;
use super::error::PanelError;
use super::types::{InstallStatus, PowerSignal, ServerState, Snapshot, SnapshotId};
use crate::config::{PanelConfig, PollSettings};
use crate::tracker::PendingOperation;
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use leasehold_common::VersionTag;
use leasehold_common::defaults::VERSION_VARIABLE;
use reqwest::{Method, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<Envelope<T>>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct BackupAttributes {
    uuid: String,
    name: String,
    #[serde(default)]
    is_locked: bool,
    #[serde(default)]
    is_successful: bool,
    #[serde(default)]
    bytes: u64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<BackupAttributes> for Snapshot {
    fn from(b: BackupAttributes) -> Self {
        Self {
            id: SnapshotId::new(b.uuid),
            name: b.name,
            held: b.is_locked,
            created_at: b.created_at,
            size_bytes: b.bytes,
            completed: b.completed_at.is_some(),
            successful: b.is_successful,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceUsage {
    current_state: String,
}

#[derive(Debug, Deserialize)]
struct FeatureLimits {
    backups: usize,
}

#[derive(Debug, Deserialize)]
struct ServerAttributes {
    #[serde(default)]
    is_installing: bool,
    #[serde(default)]
    status: Option<String>,
    feature_limits: FeatureLimits,
}

#[derive(Debug, Deserialize)]
struct FileAttributes {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

fn install_status(server: &ServerAttributes) -> InstallStatus {
    match server.status.as_deref() {
        Some("install_failed") | Some("reinstall_failed") => InstallStatus::Failed,
        Some("installing") => InstallStatus::Installing,
        _ if server.is_installing => InstallStatus::Installing,
        _ => InstallStatus::Installed,
    }
}

/// Panel client API over HTTPS
#[derive(Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    /// No panel credentials; signed download URLs point at the node
    transfer: reqwest::Client,
    base_url: String,
    polling: PollSettings,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self> {
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .context("Panel API key is not a valid header value")?;
        auth.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        let transfer = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            transfer,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            polling: config.polling.clone(),
        })
    }

    fn server_path(server_id: &str, rest: &str) -> String {
        if rest.is_empty() {
            format!("/api/client/servers/{server_id}")
        } else {
            format!("/api/client/servers/{server_id}/{rest}")
        }
    }

    /// Send one request; non-success statuses become [`PanelError::Status`]
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, PanelError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, path, "Panel request");

        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PanelError::Status {
            method: method.to_string(),
            path: path.to_string(),
            status,
            body,
        })
    }

    /// Send a request that is safe to repeat, retrying transient failures
    async fn send_idempotent(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, PanelError> {
        (|| async { self.send(method.clone(), path, body).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(10))
                    .with_max_times(4),
            )
            .when(PanelError::is_retryable)
            .notify(|e, dur| {
                warn!(delay = ?dur, path, error = %e, "Transient panel error, retrying...");
            })
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send_idempotent(Method::GET, path, None).await?;
        let value = response.json::<T>().await.map_err(PanelError::from)?;
        Ok(value)
    }

    async fn server_details(&self, server_id: &str) -> Result<ServerAttributes> {
        let server: Envelope<ServerAttributes> = self
            .get_json(&Self::server_path(server_id, ""))
            .await
            .with_context(|| format!("Failed to fetch server {server_id}"))?;
        Ok(server.attributes)
    }

    /// Current process state
    pub async fn server_state(&self, server_id: &str) -> Result<ServerState> {
        let usage: Envelope<ResourceUsage> = self
            .get_json(&Self::server_path(server_id, "resources"))
            .await
            .with_context(|| format!("Failed to fetch state of server {server_id}"))?;

        ServerState::parse(&usage.attributes.current_state).with_context(|| {
            format!(
                "Unknown state '{}' for server {server_id}",
                usage.attributes.current_state
            )
        })
    }

    pub async fn install_status(&self, server_id: &str) -> Result<InstallStatus> {
        Ok(install_status(&self.server_details(server_id).await?))
    }

    pub async fn get_snapshot(&self, server_id: &str, snapshot: &SnapshotId) -> Result<Snapshot> {
        let backup: Envelope<BackupAttributes> = self
            .get_json(&Self::server_path(server_id, &format!("backups/{snapshot}")))
            .await
            .with_context(|| format!("Failed to fetch snapshot {snapshot}"))?;
        Ok(backup.attributes.into())
    }
}

impl RemoteControl for PanelClient {
    async fn power(
        &self,
        server_id: &str,
        signal: PowerSignal,
    ) -> Result<PendingOperation<(), ServerState>> {
        let target = signal.target_state();
        let client = self.clone();
        let id = server_id.to_string();

        PendingOperation::issue(
            format!("{server_id} {signal}"),
            self.polling.power(),
            || async {
                self.send(
                    Method::POST,
                    &Self::server_path(server_id, "power"),
                    Some(&json!({ "signal": signal.as_ref() })),
                )
                .await
                .with_context(|| format!("Failed to send {signal} to server {server_id}"))?;
                info!(server_id, %signal, "Power signal sent");
                Ok::<_, anyhow::Error>(())
            },
            move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.server_state(&id).await }
            },
            move |state: &ServerState| Ok(*state == target),
        )
        .await
    }

    async fn list_snapshots(&self, server_id: &str) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        let mut page = 1;

        loop {
            let path = Self::server_path(
                server_id,
                &format!("backups?per_page={PAGE_SIZE}&page={page}"),
            );
            let list: ListEnvelope<BackupAttributes> = self
                .get_json(&path)
                .await
                .with_context(|| format!("Failed to list snapshots of server {server_id}"))?;

            snapshots.extend(list.data.into_iter().map(|b| Snapshot::from(b.attributes)));

            match list.meta {
                Some(meta) if meta.pagination.current_page < meta.pagination.total_pages => {
                    page += 1;
                }
                _ => break,
            }
        }

        debug!(server_id, count = snapshots.len(), "Listed snapshots");
        Ok(snapshots)
    }

    async fn snapshot_quota(&self, server_id: &str) -> Result<usize> {
        Ok(self.server_details(server_id).await?.feature_limits.backups)
    }

    async fn create_snapshot(
        &self,
        server_id: &str,
        name: &str,
    ) -> Result<PendingOperation<SnapshotId, Snapshot>> {
        let backup: Envelope<BackupAttributes> = self
            .send(
                Method::POST,
                &Self::server_path(server_id, "backups"),
                Some(&json!({ "name": name })),
            )
            .await
            .with_context(|| format!("Failed to create snapshot on server {server_id}"))?
            .json()
            .await
            .context("Failed to decode created snapshot")?;

        let snapshot_id = SnapshotId::new(backup.attributes.uuid);
        info!(server_id, snapshot = %snapshot_id, name, "Snapshot started");

        let client = self.clone();
        let id = server_id.to_string();
        let probe_id = snapshot_id.clone();

        PendingOperation::issue(
            format!("snapshot {snapshot_id}"),
            self.polling.snapshot(),
            || async { Ok::<_, anyhow::Error>(snapshot_id) },
            move || {
                let client = client.clone();
                let id = id.clone();
                let snapshot = probe_id.clone();
                async move { client.get_snapshot(&id, &snapshot).await }
            },
            |snapshot: &Snapshot| {
                if !snapshot.completed {
                    return Ok(false);
                }
                if !snapshot.successful {
                    anyhow::bail!("Snapshot {} finished unsuccessfully", snapshot.id);
                }
                Ok(true)
            },
        )
        .await
    }

    async fn download_snapshot(
        &self,
        server_id: &str,
        snapshot: &SnapshotId,
        dest: &Path,
    ) -> Result<u64> {
        let signed: Envelope<SignedUrl> = self
            .get_json(&Self::server_path(
                server_id,
                &format!("backups/{snapshot}/download"),
            ))
            .await
            .with_context(|| format!("Failed to get download link for snapshot {snapshot}"))?;

        let response = self
            .transfer
            .get(&signed.attributes.url)
            .send()
            .await
            .with_context(|| format!("Failed to start download of snapshot {snapshot}"))?
            .error_for_status()
            .with_context(|| format!("Download of snapshot {snapshot} was refused"))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read snapshot stream")?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.context("Failed to flush snapshot file")?;

        debug!(server_id, snapshot = %snapshot, bytes = written, "Snapshot downloaded");
        Ok(written)
    }

    async fn delete_snapshot(&self, server_id: &str, snapshot: &SnapshotId) -> Result<()> {
        let path = Self::server_path(server_id, &format!("backups/{snapshot}"));
        match self.send_idempotent(Method::DELETE, &path, None).await {
            Ok(_) => {
                info!(server_id, snapshot = %snapshot, "Snapshot deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(server_id, snapshot = %snapshot, "Snapshot already deleted");
                Ok(())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete snapshot {snapshot}"))
            }
        }
    }

    async fn toggle_hold(&self, server_id: &str, snapshot: &SnapshotId) -> Result<()> {
        self.send(
            Method::POST,
            &Self::server_path(server_id, &format!("backups/{snapshot}/lock")),
            None,
        )
        .await
        .with_context(|| format!("Failed to toggle hold on snapshot {snapshot}"))?;

        debug!(server_id, snapshot = %snapshot, "Snapshot hold toggled");
        Ok(())
    }

    async fn delete_all_files(&self, server_id: &str) -> Result<()> {
        let list: ListEnvelope<FileAttributes> = self
            .get_json(&Self::server_path(server_id, "files/list?directory=%2F"))
            .await
            .with_context(|| format!("Failed to list files of server {server_id}"))?;

        let files: Vec<String> = list.data.into_iter().map(|f| f.attributes.name).collect();
        if files.is_empty() {
            debug!(server_id, "No files to delete");
            return Ok(());
        }

        self.send(
            Method::POST,
            &Self::server_path(server_id, "files/delete"),
            Some(&json!({ "root": "/", "files": files })),
        )
        .await
        .with_context(|| format!("Failed to delete files of server {server_id}"))?;

        info!(server_id, count = files.len(), "Server files deleted");
        Ok(())
    }

    async fn reinstall(&self, server_id: &str) -> Result<PendingOperation<(), InstallStatus>> {
        let client = self.clone();
        let id = server_id.to_string();

        PendingOperation::issue(
            format!("reinstall {server_id}"),
            self.polling.reinstall(),
            || async {
                self.send(
                    Method::POST,
                    &Self::server_path(server_id, "settings/reinstall"),
                    None,
                )
                .await
                .with_context(|| format!("Failed to reinstall server {server_id}"))?;
                info!(server_id, "Reinstall started");
                Ok::<_, anyhow::Error>(())
            },
            move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.install_status(&id).await }
            },
            |status: &InstallStatus| match status {
                InstallStatus::Installed => Ok(true),
                InstallStatus::Installing => Ok(false),
                InstallStatus::Failed => anyhow::bail!("Reinstall failed on panel"),
            },
        )
        .await
    }

    async fn set_version(&self, server_id: &str, tag: &VersionTag) -> Result<()> {
        self.send_idempotent(
            Method::PUT,
            &Self::server_path(server_id, "startup/variable"),
            Some(&json!({ "key": VERSION_VARIABLE, "value": tag.to_string() })),
        )
        .await
        .with_context(|| format!("Failed to set version {tag} on server {server_id}"))?;

        info!(server_id, version = %tag, "Server version set");
        Ok(())
    }

    async fn set_image(&self, server_id: &str, image: &str) -> Result<()> {
        self.send_idempotent(
            Method::PUT,
            &Self::server_path(server_id, "settings/docker-image"),
            Some(&json!({ "docker_image": image })),
        )
        .await
        .with_context(|| format!("Failed to set image on server {server_id}"))?;

        info!(server_id, image, "Server image set");
        Ok(())
    }
}
