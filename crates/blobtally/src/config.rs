//! Run configuration
//!
//! Loaded from an optional TOML file; CLI flags override individual fields.

use crate::inventory::{
    InventoryError, Result, RetryPolicy, TraversalConfig, DEFAULT_BYTE_BUDGET, DEFAULT_PAGE_SIZE,
    HEADER_OVERHEAD,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Progress file name under the output root
pub const PROGRESS_FILE_NAME: &str = "progress.json";

/// Inventory run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Local root for manifest chunks
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Directory for the run log; defaults to `~/.blobtally/logs`
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Root of the local storage emulator to crawl
    #[serde(default)]
    pub source_root: Option<PathBuf>,

    /// Publication target: a container URL (with SAS) or a local directory
    #[serde(default)]
    pub destination_url: Option<String>,

    /// Prepended to every destination key
    #[serde(default)]
    pub destination_prefix: String,

    /// Byte budget per chunk, header included
    #[serde(default = "default_byte_budget")]
    pub byte_budget: u64,

    /// Objects requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Progress file; defaults to `{output_root}/progress.json`
    #[serde(default)]
    pub progress_file: Option<PathBuf>,

    /// YAML account/container filter
    #[serde(default)]
    pub filter_file: Option<PathBuf>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_output_root() -> PathBuf {
    blobtally_logging::blobtally_home().join("file-lists")
}

fn default_byte_budget() -> u64 {
    DEFAULT_BYTE_BUDGET
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            log_dir: None,
            source_root: None,
            destination_url: None,
            destination_prefix: String::new(),
            byte_budget: default_byte_budget(),
            page_size: default_page_size(),
            progress_file: None,
            filter_file: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl InventoryConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            InventoryError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config: InventoryConfig =
            toml::from_str(&content).map_err(|e| InventoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the crawl cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.byte_budget <= HEADER_OVERHEAD {
            return Err(InventoryError::Config(format!(
                "byte_budget must exceed the {}-byte header overhead",
                HEADER_OVERHEAD
            )));
        }
        if self.page_size == 0 {
            return Err(InventoryError::Config("page_size must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(InventoryError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn progress_path(&self) -> PathBuf {
        self.progress_file
            .clone()
            .unwrap_or_else(|| self.output_root.join(PROGRESS_FILE_NAME))
    }

    pub fn to_traversal_config(&self) -> TraversalConfig {
        TraversalConfig {
            output_root: self.output_root.clone(),
            byte_budget: self.byte_budget,
            page_size: self.page_size,
            retry: self.retry.clone(),
        }
    }
}
