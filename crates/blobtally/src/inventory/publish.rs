//! Idempotent publication of finished chunks
//!
//! Every chunk is written to the destination with create-if-absent
//! semantics. A destination that already holds an object of identical size
//! counts as published, which makes re-running a finished crawl a no-op.
//! Any other answer is a failure the caller must not ignore.

use super::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// What a destination reports for a conditional create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalPut {
    /// The object did not exist and was written
    Created,
    /// An object already exists under the key with the same byte size
    AlreadyExistsSameSize,
    /// Anything else, with a description for the logs
    Other(String),
}

/// Destination for published chunks.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Write `local` under `key` unless an object already exists there.
    ///
    /// `Err` is reserved for failures to even reach the destination or read
    /// the local file.
    async fn put_if_absent(&self, key: &str, local: &Path) -> Result<ConditionalPut>;

    /// Human readable location of `key`, for logs.
    fn describe(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Result of publishing one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    SkippedIdentical,
    Failed(String),
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Created => write!(f, "created"),
            PublishOutcome::SkippedIdentical => write!(f, "skipped (identical size)"),
            PublishOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Publishes local chunks to a destination store
#[derive(Clone)]
pub struct UploadReconciler {
    store: Arc<dyn DestinationStore>,
    prefix: String,
}

impl UploadReconciler {
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self {
            store,
            prefix: String::new(),
        }
    }

    /// Prepend `prefix` to every destination key.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn destination_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Publish one chunk. The local file is left in place.
    pub async fn publish(&self, local: &Path, key: &str) -> PublishOutcome {
        let key = self.destination_key(key);
        let location = self.store.describe(&key);
        match self.store.put_if_absent(&key, local).await {
            Ok(ConditionalPut::Created) => {
                info!(destination = %location, "Output CSV successfully written to destination");
                PublishOutcome::Created
            }
            Ok(ConditionalPut::AlreadyExistsSameSize) => {
                info!(destination = %location, "Skipped writing output CSV, file size is equal");
                PublishOutcome::SkippedIdentical
            }
            Ok(ConditionalPut::Other(detail)) => {
                warn!(destination = %location, detail = %detail, "Destination rejected chunk");
                PublishOutcome::Failed(detail)
            }
            Err(e) => {
                warn!(destination = %location, error = %e, "Could not publish chunk");
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryDestination;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_publish_then_republish_is_skipped() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("chunk.csv");
        fs::write(&local, "header\r\nrow\r\n").unwrap();

        let store = Arc::new(MemoryDestination::new());
        let reconciler = UploadReconciler::new(store.clone()).with_prefix("manifests/");

        assert_eq!(
            reconciler.publish(&local, "a/c/r-0.csv").await,
            PublishOutcome::Created
        );
        assert_eq!(
            reconciler.publish(&local, "a/c/r-0.csv").await,
            PublishOutcome::SkippedIdentical
        );
        assert!(store.contains("manifests/a/c/r-0.csv"));
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_size_mismatch_fails() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("chunk.csv");
        fs::write(&local, "header\r\nrow\r\n").unwrap();

        let store = Arc::new(MemoryDestination::new());
        store.insert("a/c/r-0.csv", b"something else entirely".to_vec());
        let reconciler = UploadReconciler::new(store);

        let outcome = reconciler.publish(&local, "a/c/r-0.csv").await;
        assert!(matches!(outcome, PublishOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_missing_local_file_fails() {
        let dir = tempdir().unwrap();
        let reconciler = UploadReconciler::new(Arc::new(MemoryDestination::new()));
        let outcome = reconciler
            .publish(&dir.path().join("missing.csv"), "k.csv")
            .await;
        assert!(matches!(outcome, PublishOutcome::Failed(_)));
    }
}
