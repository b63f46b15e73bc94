//! Byte-bounded manifest chunks
//!
//! Each container scan writes `{root}/{account}/{container}/{run_id}-{volume}.csv`.
//! Pages are appended whole; when the accounted size of the live volume plus
//! the incoming page would exceed the budget, the page opens the next volume
//! instead. A single page larger than the budget therefore still lands in
//! exactly one file.

use super::error::{InventoryError, Result};
use super::types::{Container, ObjectRecord};
use blobtally_ids::RunId;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest header row, CRLF terminated
pub const MANIFEST_HEADER: &str =
    "name,account,container,ResourceType,createdOn,lastModified,contentLength,contentMD5,accessTier\r\n";

/// Default byte budget per chunk
pub const DEFAULT_BYTE_BUDGET: u64 = 16_000_000;

/// Bytes charged to a volume before its first row; a fixed estimate of the
/// header, not its exact length
pub const HEADER_OVERHEAD: u64 = 98;

fn header_len() -> u64 {
    MANIFEST_HEADER.len() as u64
}

/// File name of one chunk: `{run_id}-{volume}.csv`
pub fn chunk_file_name(run_id: &RunId, volume: u32) -> String {
    format!("{}-{}.csv", run_id, volume)
}

/// Local path of one chunk
pub fn chunk_path(root: &Path, container: &Container, run_id: &RunId, volume: u32) -> PathBuf {
    root.join(&container.account)
        .join(&container.name)
        .join(chunk_file_name(run_id, volume))
}

/// Destination-relative key of one chunk: `{account}/{container}/{run_id}-{volume}.csv`
pub fn chunk_key(container: &Container, run_id: &RunId, volume: u32) -> String {
    format!(
        "{}/{}/{}",
        container.account,
        container.name,
        chunk_file_name(run_id, volume)
    )
}

/// Serialize records as CRLF-terminated rows without a header
pub fn serialize_records(records: &[ObjectRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    for record in records {
        writer.write_record(record.to_row())?;
    }
    writer
        .into_inner()
        .map_err(|e| InventoryError::Io(e.into_error()))
}

/// Accounting state of the live chunk; persisted in progress markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkState {
    pub run_id: RunId,
    pub volume: u32,
    /// Accounted bytes of the live volume, header included
    pub bytes: u64,
    /// Length of the live volume file on disk (0 = not created yet)
    pub file_len: u64,
}

impl ChunkState {
    pub fn fresh(run_id: RunId) -> Self {
        Self {
            run_id,
            volume: 0,
            bytes: HEADER_OVERHEAD,
            file_len: 0,
        }
    }

    fn holds_rows(&self) -> bool {
        self.file_len > header_len()
    }
}

/// Result of one append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub volume: u32,
    pub rotated: bool,
    pub bytes_written: u64,
}

/// Writer for the chunks of one container scan
#[derive(Debug)]
pub struct ChunkWriter {
    root: PathBuf,
    container: Container,
    budget: u64,
    state: ChunkState,
}

impl ChunkWriter {
    /// Start a new scan under a fresh run id
    pub fn new(root: impl Into<PathBuf>, container: Container, budget: u64) -> Self {
        Self {
            root: root.into(),
            container,
            budget,
            state: ChunkState::fresh(RunId::new()),
        }
    }

    /// Continue an interrupted scan from its last persisted state.
    ///
    /// Rows appended after `state` was recorded are dropped: the live volume
    /// is truncated back to `state.file_len` and later volumes of the same run
    /// are deleted. The resumed listing rewrites them.
    pub fn resume(
        root: impl Into<PathBuf>,
        container: Container,
        budget: u64,
        state: ChunkState,
    ) -> Result<Self> {
        let writer = Self {
            root: root.into(),
            container,
            budget,
            state,
        };
        writer.discard_unrecorded()?;
        Ok(writer)
    }

    fn discard_unrecorded(&self) -> Result<()> {
        let live = self.current_path();
        if live.exists() {
            if self.state.file_len == 0 {
                fs::remove_file(&live)?;
            } else {
                let file = OpenOptions::new().write(true).open(&live)?;
                file.set_len(self.state.file_len)?;
            }
        } else if self.state.file_len > 0 {
            return Err(InventoryError::InvalidState(format!(
                "chunk {} recorded at {} bytes is missing",
                live.display(),
                self.state.file_len
            )));
        }

        let dir = self.container_dir();
        if !dir.exists() {
            return Ok(());
        }
        let prefix = format!("{}-", self.state.run_id);
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let volume = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".csv"))
                .and_then(|v| v.parse::<u32>().ok());
            if let Some(volume) = volume {
                if volume > self.state.volume {
                    debug!(path = %entry.path().display(), "Removing unrecorded chunk volume");
                    fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn run_id(&self) -> &RunId {
        &self.state.run_id
    }

    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    fn container_dir(&self) -> PathBuf {
        self.root
            .join(&self.container.account)
            .join(&self.container.name)
    }

    /// Path of the live volume
    pub fn current_path(&self) -> PathBuf {
        chunk_path(
            &self.root,
            &self.container,
            &self.state.run_id,
            self.state.volume,
        )
    }

    /// Append one page of records to the live chunk, rotating first if the
    /// page would push the live volume over budget.
    pub fn append_records(&mut self, records: &[ObjectRecord]) -> Result<AppendOutcome> {
        if records.is_empty() {
            return Ok(AppendOutcome {
                volume: self.state.volume,
                rotated: false,
                bytes_written: 0,
            });
        }

        let rows = serialize_records(records)?;
        let batch_len = rows.len() as u64;

        let rotated = self.state.holds_rows() && self.state.bytes + batch_len > self.budget;
        if rotated {
            self.state.volume += 1;
            self.state.bytes = HEADER_OVERHEAD + batch_len;
            self.state.file_len = 0;
            info!(
                account = %self.container.account,
                container = %self.container.name,
                volume = self.state.volume,
                "Byte budget reached, rotating chunk"
            );
        } else {
            self.state.bytes += batch_len;
        }

        self.ensure_live_file()?;
        let path = self.current_path();
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&rows)?;
        file.flush()?;
        self.state.file_len += batch_len;

        debug!(
            path = %path.display(),
            records = records.len(),
            bytes = batch_len,
            accounted = self.state.bytes,
            "Appended page to chunk"
        );

        Ok(AppendOutcome {
            volume: self.state.volume,
            rotated,
            bytes_written: batch_len,
        })
    }

    /// Create the live volume with its header if it does not exist yet.
    fn ensure_live_file(&mut self) -> Result<()> {
        let path = self.current_path();
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(self.container_dir())?;
        fs::write(&path, MANIFEST_HEADER)?;
        self.state.file_len = header_len();
        Ok(())
    }

    /// Ensure an empty container still leaves a header-only manifest.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_live_file()
    }

    /// Every chunk written by this run, oldest volume first
    pub fn chunk_paths(&self) -> Vec<PathBuf> {
        (0..=self.state.volume)
            .map(|volume| chunk_path(&self.root, &self.container, &self.state.run_id, volume))
            .filter(|path| path.exists())
            .collect()
    }

    /// `(local path, destination key)` for every chunk written by this run
    pub fn chunks(&self) -> Vec<(PathBuf, String)> {
        (0..=self.state.volume)
            .map(|volume| {
                (
                    chunk_path(&self.root, &self.container, &self.state.run_id, volume),
                    chunk_key(&self.container, &self.state.run_id, volume),
                )
            })
            .filter(|(path, _)| path.exists())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::types::RawObject;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(container: &Container, name: &str) -> ObjectRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        ObjectRecord::from_raw(
            container,
            RawObject {
                name: name.to_string(),
                resource_type: None,
                created_on: ts,
                last_modified: ts,
                content_length: 7,
                content_md5: None,
                access_tier: Some("Hot".to_string()),
            },
        )
    }

    fn page(container: &Container, start: usize, count: usize) -> Vec<ObjectRecord> {
        (start..start + count)
            .map(|i| record(container, &format!("obj-{:05}", i)))
            .collect()
    }

    #[test]
    fn test_accounting_starts_at_header_overhead() {
        assert_eq!(MANIFEST_HEADER.len(), 96);
        let state = ChunkState::fresh(RunId::new());
        assert_eq!(state.bytes, HEADER_OVERHEAD);
        assert_eq!(state.file_len, 0);
    }

    #[test]
    fn test_rotated_volume_is_charged_header_overhead() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let row_len = serialize_records(&page(&container, 0, 1)).unwrap().len() as u64;
        let mut writer =
            ChunkWriter::new(dir.path(), container.clone(), HEADER_OVERHEAD + 2 * row_len);

        writer.append_records(&page(&container, 0, 2)).unwrap();
        assert_eq!(writer.state().bytes, HEADER_OVERHEAD + 2 * row_len);

        let rotated = writer.append_records(&page(&container, 2, 1)).unwrap();
        assert!(rotated.rotated);
        assert_eq!(writer.state().bytes, HEADER_OVERHEAD + row_len);
        assert_eq!(writer.state().file_len, header_len() + row_len);
    }

    #[test]
    fn test_serialize_quotes_and_crlf() {
        let container = Container::new("acct", "data");
        let mut rec = record(&container, "a,b \"quoted\"");
        rec.content_md5 = Some("AAAA".to_string());
        let bytes = serialize_records(&[rec]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "\"a,b \"\"quoted\"\"\",acct,data,,2024-03-01T12:00:00.000Z,2024-03-01T12:00:00.000Z,7,AAAA,Hot\r\n"
        );
    }

    #[test]
    fn test_first_page_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let mut writer = ChunkWriter::new(dir.path(), container.clone(), DEFAULT_BYTE_BUDGET);

        let outcome = writer.append_records(&page(&container, 0, 3)).unwrap();
        assert_eq!(outcome.volume, 0);
        assert!(!outcome.rotated);

        let path = writer.current_path();
        assert_eq!(
            path,
            dir.path()
                .join("acct")
                .join("data")
                .join(format!("{}-0.csv", writer.run_id()))
        );
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(MANIFEST_HEADER));
        assert_eq!(content.lines().count(), 4);
        assert_eq!(writer.state().file_len, content.len() as u64);
    }

    #[test]
    fn test_rotation_moves_whole_page_to_next_volume() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let row_len = serialize_records(&page(&container, 0, 1)).unwrap().len() as u64;
        // Room for the header plus three rows
        let budget = HEADER_OVERHEAD + 3 * row_len;
        let mut writer = ChunkWriter::new(dir.path(), container.clone(), budget);

        assert_eq!(writer.append_records(&page(&container, 0, 2)).unwrap().volume, 0);
        let second = writer.append_records(&page(&container, 2, 2)).unwrap();
        assert!(second.rotated);
        assert_eq!(second.volume, 1);

        let paths = writer.chunk_paths();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            let content = fs::read_to_string(path).unwrap();
            assert!(content.starts_with(MANIFEST_HEADER));
            assert_eq!(content.lines().count(), 3);
            assert!(content.len() as u64 <= budget);
        }
    }

    #[test]
    fn test_oversized_first_page_stays_in_volume_zero() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let mut writer = ChunkWriter::new(dir.path(), container.clone(), 200);

        let first = writer.append_records(&page(&container, 0, 10)).unwrap();
        assert_eq!(first.volume, 0);
        assert!(!first.rotated);

        // Anything after an oversized page rotates
        let second = writer.append_records(&page(&container, 10, 1)).unwrap();
        assert_eq!(second.volume, 1);
        assert!(second.rotated);
    }

    #[test]
    fn test_pre_rotation_bytes_never_exceed_budget() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let row_len = serialize_records(&page(&container, 0, 1)).unwrap().len() as u64;
        let budget = HEADER_OVERHEAD + 7 * row_len;
        let mut writer = ChunkWriter::new(dir.path(), container.clone(), budget);

        let sizes = [1usize, 3, 2, 5, 1, 1, 4, 6, 2, 3];
        let mut next = 0;
        for size in sizes {
            let before = writer.state().clone();
            let outcome = writer.append_records(&page(&container, next, size)).unwrap();
            next += size;
            if !outcome.rotated {
                assert!(writer.state().bytes <= budget);
            } else {
                assert!(before.bytes <= budget);
            }
        }

        let total_rows: usize = writer
            .chunk_paths()
            .iter()
            .map(|p| fs::read_to_string(p).unwrap().lines().count() - 1)
            .sum();
        assert_eq!(total_rows, next);
    }

    #[test]
    fn test_distinct_run_ids_same_rows_different_paths() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let records = page(&container, 0, 25);

        let mut first = ChunkWriter::new(dir.path(), container.clone(), DEFAULT_BYTE_BUDGET);
        let mut second = ChunkWriter::new(dir.path(), container.clone(), DEFAULT_BYTE_BUDGET);
        first.append_records(&records).unwrap();
        second.append_records(&records).unwrap();

        assert_ne!(first.current_path(), second.current_path());
        assert_eq!(
            fs::read(first.current_path()).unwrap(),
            fs::read(second.current_path()).unwrap()
        );
    }

    #[test]
    fn test_resume_truncates_unrecorded_rows() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let mut writer = ChunkWriter::new(dir.path(), container.clone(), DEFAULT_BYTE_BUDGET);
        writer.append_records(&page(&container, 0, 2)).unwrap();
        let recorded = writer.state().clone();

        // Rows written after the last persisted state
        writer.append_records(&page(&container, 2, 3)).unwrap();

        let resumed =
            ChunkWriter::resume(dir.path(), container.clone(), DEFAULT_BYTE_BUDGET, recorded)
                .unwrap();
        let content = fs::read_to_string(resumed.current_path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(!content.contains("obj-00002"));
    }

    #[test]
    fn test_resume_removes_later_volumes() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "data");
        let row_len = serialize_records(&page(&container, 0, 1)).unwrap().len() as u64;
        let mut writer = ChunkWriter::new(dir.path(), container.clone(), header_len() + row_len);
        writer.append_records(&page(&container, 0, 1)).unwrap();
        let recorded = writer.state().clone();
        writer.append_records(&page(&container, 1, 1)).unwrap();
        assert_eq!(writer.chunk_paths().len(), 2);

        let resumed = ChunkWriter::resume(
            dir.path(),
            container.clone(),
            header_len() + row_len,
            recorded,
        )
        .unwrap();
        assert_eq!(resumed.chunk_paths().len(), 1);
    }

    #[test]
    fn test_finish_leaves_header_only_manifest() {
        let dir = tempdir().unwrap();
        let container = Container::new("acct", "empty");
        let mut writer = ChunkWriter::new(dir.path(), container, DEFAULT_BYTE_BUDGET);
        writer.finish().unwrap();

        let chunks = writer.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(fs::read_to_string(&chunks[0].0).unwrap(), MANIFEST_HEADER);
        assert!(chunks[0].1.starts_with("acct/empty/"));
    }
}
