//! Error types for the inventory pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Inventory error type
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Retry eligible: throttling, timeouts, dropped connections.
    #[error("Transient listing error on {scope}: {message}")]
    TransientListing { scope: String, message: String },

    /// Listing failed in a way retrying will not fix, or retries ran out.
    #[error("Listing error on {scope}: {message}")]
    Listing { scope: String, message: String },

    #[error("Could not resolve keys for account {account}: {message}")]
    KeyResolution { account: String, message: String },

    #[error("Failed to publish {path} for {account}/{container}: {reason}")]
    Publish {
        account: String,
        container: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Destination error: {0}")]
    Destination(String),

    #[error("Progress file {path} is unreadable: {message}")]
    CorruptProgress { path: PathBuf, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl InventoryError {
    /// Check if this error is transient (eligible for retry)
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::TransientListing { .. })
    }

    /// Check if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InventoryError::Publish { .. } | InventoryError::Config(_) | InventoryError::Io(_)
        )
    }

    pub fn transient(scope: impl Into<String>, message: impl Into<String>) -> Self {
        InventoryError::TransientListing {
            scope: scope.into(),
            message: message.into(),
        }
    }

    pub fn listing(scope: impl Into<String>, message: impl Into<String>) -> Self {
        InventoryError::Listing {
            scope: scope.into(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(InventoryError::transient("acct/c", "503").is_transient());
        assert!(!InventoryError::listing("acct/c", "403").is_transient());
    }

    #[test]
    fn test_publish_error_is_fatal_and_names_chunk() {
        let err = InventoryError::Publish {
            account: "acct".to_string(),
            container: "data".to_string(),
            path: PathBuf::from("/tmp/acct/data/run-0.csv"),
            reason: "HTTP 403".to_string(),
        };
        assert!(err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("acct/data"));
        assert!(message.contains("run-0.csv"));
    }
}
