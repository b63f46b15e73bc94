//! Resumable crawl progress
//!
//! Progress is one JSON object keyed by unit: `{account}/{container}` for a
//! container scan and `{account}` for a finished account. Saves go through a
//! sibling temp file and a rename, so a crash mid-save leaves the previous
//! document intact.

use super::chunk::ChunkState;
use super::error::{InventoryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where a unit stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Listing in progress; resume from `cursor`
    Started,
    /// Listing exhausted, chunks not yet published
    Listed,
    /// Nothing left to do
    Complete,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Started => "started",
            UnitStatus::Listed => "listed",
            UnitStatus::Complete => "complete",
        }
    }
}

/// Persisted state of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub status: UnitStatus,
    /// Continuation token of the next page to list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Chunk accounting as of the last appended page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkState>,
    /// Set once the unit's chunks reached the destination. A unit completed
    /// without publishing stays pending for the next publishing run.
    #[serde(default)]
    pub published: bool,
    pub updated_at: DateTime<Utc>,
}

pub type ProgressMap = BTreeMap<String, ProgressMarker>;

/// Loads, updates and saves the progress document
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    map: ProgressMap,
}

impl ProgressTracker {
    /// Start with an empty map; the file is not read.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: ProgressMap::new(),
        }
    }

    /// Load the document. A missing file is an empty map; an unparseable one
    /// is `CorruptProgress`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }
        let content = fs::read_to_string(&path)?;
        let map: ProgressMap =
            serde_json::from_str(&content).map_err(|e| InventoryError::CorruptProgress {
                path: path.clone(),
                message: e.to_string(),
            })?;
        debug!(path = %path.display(), units = map.len(), "Loaded progress");
        Ok(Self { path, map })
    }

    /// Load the document, falling back to an empty map when it is corrupt.
    ///
    /// The unreadable file is moved aside to `<name>.corrupt` so the next save
    /// does not destroy it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match Self::load(path.clone()) {
            Ok(tracker) => Ok(tracker),
            Err(InventoryError::CorruptProgress { path, message }) => {
                let aside = sibling(&path, ".corrupt", false);
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %message,
                    "Progress file is corrupt, starting with empty progress"
                );
                if let Err(e) = fs::rename(&path, &aside) {
                    warn!(path = %path.display(), error = %e, "Failed to move corrupt progress aside");
                }
                Ok(Self::empty(path))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn map(&self) -> &ProgressMap {
        &self.map
    }

    pub fn get(&self, key: &str) -> Option<&ProgressMarker> {
        self.map.get(key)
    }

    pub fn is_complete(&self, key: &str) -> bool {
        matches!(
            self.map.get(key),
            Some(ProgressMarker {
                status: UnitStatus::Complete,
                ..
            })
        )
    }

    pub fn is_published(&self, key: &str) -> bool {
        matches!(
            self.map.get(key),
            Some(ProgressMarker {
                status: UnitStatus::Complete,
                published: true,
                ..
            })
        )
    }

    /// Whether `key` needs no work from a run that does (`publishing`) or
    /// does not publish.
    pub fn is_finished(&self, key: &str, publishing: bool) -> bool {
        if publishing {
            self.is_published(key)
        } else {
            self.is_complete(key)
        }
    }

    /// Record that `key` is being listed and that the next page starts at
    /// `cursor` (`None`: from the beginning).
    pub fn mark_unit_started(&mut self, key: &str, cursor: Option<String>, chunk: ChunkState) {
        self.map.insert(
            key.to_string(),
            ProgressMarker {
                status: UnitStatus::Started,
                cursor,
                chunk: Some(chunk),
                published: false,
                updated_at: Utc::now(),
            },
        );
    }

    /// Record that listing of `key` is exhausted
    pub fn mark_unit_listed(&mut self, key: &str, chunk: ChunkState) {
        self.map.insert(
            key.to_string(),
            ProgressMarker {
                status: UnitStatus::Listed,
                cursor: None,
                chunk: Some(chunk),
                published: false,
                updated_at: Utc::now(),
            },
        );
    }

    /// Record that `key` is finished; `published` says whether its chunks
    /// reached the destination. The chunk state is kept so a later run can
    /// still publish them.
    pub fn mark_unit_complete(&mut self, key: &str, published: bool) {
        let chunk = self.map.get(key).and_then(|marker| marker.chunk.clone());
        self.map.insert(
            key.to_string(),
            ProgressMarker {
                status: UnitStatus::Complete,
                cursor: None,
                chunk,
                published,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn mark_account_complete(&mut self, account: &str, published: bool) {
        self.mark_unit_complete(account, published);
    }

    /// Write the whole map through a temp file and rename it into place
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = sibling(&self.path, ".tmp", true);
        let json = serde_json::to_vec_pretty(&self.map)?;
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            InventoryError::Io(e)
        })?;
        Ok(())
    }
}

/// `dir/name` -> `dir/[.]name<suffix>`
fn sibling(path: &Path, suffix: &str, hidden: bool) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "progress".to_string());
    let name = if hidden {
        format!(".{}{}", name, suffix)
    } else {
        format!("{}{}", name, suffix)
    };
    path.with_file_name(name)
}
