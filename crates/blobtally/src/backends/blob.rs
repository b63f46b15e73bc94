//! Blob-service destination over HTTP
//!
//! The destination URL names a container, optionally carrying a SAS query
//! string: `https://{account}.blob.core.windows.net/{container}?{sas}`.
//! Chunks are written as block blobs with `If-None-Match: *`, so an existing
//! blob is never overwritten.

use crate::inventory::{ConditionalPut, DestinationStore, InventoryError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;
use std::path::Path;
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2021-08-06";

/// Blob container reached through its URL
pub struct BlobDestination {
    /// Container URL without query or fragment
    container: Url,
    query: Option<String>,
    http_client: reqwest::Client,
}

impl BlobDestination {
    pub fn new(container_url: &str) -> Result<Self> {
        let mut container = Url::parse(container_url).map_err(|e| {
            InventoryError::Config(format!("Invalid destination URL {}: {}", container_url, e))
        })?;
        if !matches!(container.scheme(), "http" | "https") {
            return Err(InventoryError::Config(format!(
                "Destination URL must be http(s): {}",
                container_url
            )));
        }
        let query = container
            .query()
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        container.set_query(None);
        container.set_fragment(None);
        Ok(Self {
            container,
            query,
            http_client: reqwest::Client::new(),
        })
    }

    /// Container URL extended by the segments of `key`, each percent-encoded
    fn key_url(&self, key: &str) -> Url {
        let mut url = self.container.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(key.split('/').filter(|segment| !segment.is_empty()));
        }
        url
    }

    /// Full URL of the blob stored under `key`
    pub fn blob_url(&self, key: &str) -> String {
        let mut url = self.key_url(key);
        url.set_query(self.query.as_deref());
        url.to_string()
    }

    async fn remote_len(&self, url: &str) -> Result<Option<u64>> {
        let response = self
            .http_client
            .head(url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| InventoryError::Destination(e.to_string()))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()))
    }
}

#[async_trait]
impl DestinationStore for BlobDestination {
    async fn put_if_absent(&self, key: &str, local: &Path) -> Result<ConditionalPut> {
        let body = tokio::fs::read(local).await?;
        let local_len = body.len() as u64;
        let url = self.blob_url(key);

        let response = self
            .http_client
            .put(&url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-blob-content-type", "text/csv")
            .header("If-None-Match", "*")
            .body(body)
            .send()
            .await
            .map_err(|e| InventoryError::Destination(e.to_string()))?;

        let status = response.status();
        debug!(key = %key, status = status.as_u16(), "Blob put answered");
        match status {
            StatusCode::CREATED => Ok(ConditionalPut::Created),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                match self.remote_len(&url).await? {
                    Some(remote) if remote == local_len => Ok(ConditionalPut::AlreadyExistsSameSize),
                    Some(remote) => Ok(ConditionalPut::Other(format!(
                        "blob exists with {} bytes, local chunk has {}",
                        remote, local_len
                    ))),
                    None => Ok(ConditionalPut::Other(
                        "blob exists but its size could not be read".to_string(),
                    )),
                }
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Ok(ConditionalPut::Other(format!(
                    "HTTP {}: {}",
                    status,
                    text.chars().take(200).collect::<String>()
                )))
            }
        }
    }

    fn describe(&self, key: &str) -> String {
        self.key_url(key).to_string()
    }
}
