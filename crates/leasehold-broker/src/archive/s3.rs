//! S3 archive transport

use super::transport::{ArchiveTransport, file_name};
use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, primitives::ByteStream};
use std::path::Path;
use tracing::{debug, info};

/// Uploads archives as `s3://{bucket}/{prefix}/{folder}/{file}`
#[derive(Clone)]
pub struct S3Transport {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Transport {
    /// Load AWS configuration for `region` from the environment
    pub async fn new(bucket: &str, prefix: &str, region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        info!(bucket, region, "S3 archive transport ready");
        Self::from_client(Client::new(&config), bucket, prefix)
    }

    pub fn from_client(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Object key for `file` inside `folder`
    pub fn object_key(&self, folder: &str, file: &str) -> String {
        let folder = folder.trim_matches('/');
        if self.prefix.is_empty() {
            format!("{folder}/{file}")
        } else {
            format!("{}/{folder}/{file}", self.prefix)
        }
    }
}

impl ArchiveTransport for S3Transport {
    async fn upload(&self, local_path: &Path, remote_folder: &str) -> Result<String> {
        let key = self.object_key(remote_folder, file_name(local_path)?);
        debug!(bucket = %self.bucket, key = %key, path = %local_path.display(), "Uploading archive");

        let body = ByteStream::from_path(local_path)
            .await
            .context("Failed to read archive file")?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type("application/gzip")
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{}/{key}", self.bucket))?;

        Ok(format!("s3://{}/{key}", self.bucket))
    }
}
