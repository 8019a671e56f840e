//! Object-store collaborator used for photo attachments.

use std::{path::Path, time::Duration};

use anyhow::Context;
use reqwest::{Client, Url};

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent PUT of `local` to `remote_path`. `false` means the upload
    /// did not complete and should be retried later.
    async fn upload(&self, local: &Path, remote_path: &str) -> bool;
}

pub struct HttpObjectStore {
    base_url: Url,
    client: Client,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = crate::remote::http::parse_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build object store client")?;
        Ok(Self { base_url, client })
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, local: &Path, remote_path: &str) -> bool {
        let bytes = match tokio::fs::read(local).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, path = %local.display(), "failed to read upload source");
                return false;
            }
        };
        let url = match self.base_url.join(remote_path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, remote_path, "invalid object path");
                return false;
            }
        };

        match self.client.put(url).body(bytes).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = response.status().as_u16(), remote_path, "object upload rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, remote_path, "object upload failed");
                false
            }
        }
    }
}
