//! `blobtally status`: show the progress document.

use crate::cli::error::HelpfulError;
use crate::cli::output::progress_table;
use blobtally::inventory::{InventoryError, ProgressTracker, UnitStatus};
use blobtally::InventoryConfig;
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Local directory holding the manifests and progress.json
    #[arg(long = "file-list-dir", env = "FILE_LIST_DIR")]
    pub file_list_dir: Option<PathBuf>,

    /// Progress file (overrides --file-list-dir)
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => InventoryConfig::load(path)
            .map_err(|e| HelpfulError::invalid_config(Some(path), &e.to_string()))?,
        None => InventoryConfig::default(),
    };
    if let Some(dir) = args.file_list_dir {
        config.output_root = dir;
    }
    if let Some(file) = args.progress_file {
        config.progress_file = Some(file);
    }

    let path = config.progress_path();
    let tracker = ProgressTracker::load(&path).map_err(|e| match e {
        InventoryError::CorruptProgress { path, message } => {
            anyhow::Error::new(
                HelpfulError::new(format!("Progress file is corrupt: {}", path.display()))
                    .with_context(message)
                    .with_suggestion("TRY: The next scan moves it aside and starts over"),
            )
        }
        other => anyhow::Error::new(other),
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(tracker.map())?);
        return Ok(());
    }

    if tracker.map().is_empty() {
        println!("No progress recorded at {}", path.display());
        return Ok(());
    }

    println!("{}", progress_table(tracker.map()));
    let complete = tracker
        .map()
        .values()
        .filter(|m| m.status == UnitStatus::Complete)
        .count();
    let unpublished = tracker
        .map()
        .values()
        .filter(|m| m.status == UnitStatus::Complete && !m.published)
        .count();
    println!(
        "{} of {} units complete, {} not yet published ({})",
        complete,
        tracker.map().len(),
        unpublished,
        path.display()
    );
    Ok(())
}
