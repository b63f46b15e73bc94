//! Shared logging setup for the blobtally binary.
//!
//! Every run logs to stderr and to its own file under the log directory. The
//! file is named after the moment the run started, so consecutive crawls
//! never interleave their output. A run that outgrows one file continues in
//! numbered segments (`{start}.1.log`, `{start}.2.log`, ...). Only the most
//! recent runs are kept.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "blobtally=info";
const MAX_SEGMENT_BYTES: u64 = 50 * 1024 * 1024;
const KEEP_RUNS: usize = 30;

/// Logging configuration for one process.
pub struct LogConfig<'a> {
    /// Directory for the run log. Falls back to `~/.blobtally/logs`.
    pub log_dir: Option<&'a Path>,
    /// Mirror the file filter on stderr instead of only warnings.
    pub verbose: bool,
    /// Start of the run; names the log file.
    pub started_at: DateTime<Local>,
}

/// Initialize tracing with a per-run log file and stderr output.
///
/// Returns the path of the run's first log segment.
pub fn init_logging(config: LogConfig<'_>) -> Result<PathBuf> {
    let log_dir = match config.log_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let stem = run_log_name(&config.started_at);
    let run_log = RunLog::create(&log_dir, &stem, MAX_SEGMENT_BYTES)
        .with_context(|| format!("Failed to open run log in {}", log_dir.display()))?;
    let log_path = run_log.segment_path(0);
    if let Err(e) = prune_run_logs(&log_dir, KEEP_RUNS) {
        eprintln!("Warning: failed to prune old run logs: {}", e);
    }

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(SharedRunLog::new(run_log))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(log_path)
}

/// Log file stem for a run started at `started_at`, e.g. `2024-05-01T09-30-00`.
pub fn run_log_name(started_at: &DateTime<Local>) -> String {
    started_at.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Get the blobtally home directory: ~/.blobtally
pub fn blobtally_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("BLOBTALLY_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blobtally")
}

/// Get the default logs directory: ~/.blobtally/logs
pub fn default_logs_dir() -> PathBuf {
    blobtally_home().join("logs")
}

/// Delete the segments of all but the newest `keep` runs in `dir`.
///
/// Run stems are start timestamps, so name order is age order.
pub fn prune_run_logs(dir: &Path, keep: usize) -> io::Result<usize> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stem) = name.strip_suffix(".log").map(run_stem) {
            logs.push((stem.to_string(), entry.path()));
        }
    }

    let runs: BTreeSet<&str> = logs.iter().map(|(stem, _)| stem.as_str()).collect();
    if runs.len() <= keep {
        return Ok(0);
    }
    let expired: BTreeSet<String> = runs
        .iter()
        .take(runs.len() - keep)
        .map(|stem| stem.to_string())
        .collect();

    let mut removed = 0;
    for (stem, path) in &logs {
        if expired.contains(stem) {
            fs::remove_file(path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// `2024-05-01T09-30-00.2` -> `2024-05-01T09-30-00`
fn run_stem(name: &str) -> &str {
    match name.split_once('.') {
        Some((stem, _)) => stem,
        None => name,
    }
}

/// Segmented log file of one run
struct RunLog {
    dir: PathBuf,
    stem: String,
    max_segment_bytes: u64,
    segment: u32,
    file: File,
    written: u64,
}

impl RunLog {
    fn create(dir: &Path, stem: &str, max_segment_bytes: u64) -> io::Result<Self> {
        let path = dir.join(format!("{}.log", stem));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            max_segment_bytes,
            segment: 0,
            file,
            written,
        })
    }

    fn segment_path(&self, segment: u32) -> PathBuf {
        if segment == 0 {
            self.dir.join(format!("{}.log", self.stem))
        } else {
            self.dir.join(format!("{}.{}.log", self.stem, segment))
        }
    }

    /// Continue in the next segment
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let next = self.segment + 1;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(next))?;
        self.segment = next;
        self.written = 0;
        Ok(())
    }
}

impl Write for RunLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A line longer than a whole segment still goes out in one piece
        if self.written > 0 && self.written + buf.len() as u64 > self.max_segment_bytes {
            self.roll()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `MakeWriter` over one `RunLog` shared by every event
#[derive(Clone)]
struct SharedRunLog {
    inner: Arc<Mutex<RunLog>>,
}

impl SharedRunLog {
    fn new(log: RunLog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(log)),
        }
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut RunLog) -> io::Result<T>) -> io::Result<T> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "run log lock poisoned"))?;
        f(&mut *log)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRunLog {
    type Writer = SharedRunLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedRunLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_log(|log| log.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_log(|log| log.flush())
    }
}
