//! `blobtally scan`: crawl the inventory and write (and optionally publish)
//! the manifests.

use crate::cli::error::HelpfulError;
use crate::cli::output::{parse_size, summary_table};
use blobtally::backends::{BlobDestination, LocalDestination, LocalInventory};
use blobtally::inventory::{
    Collaborators, DestinationStore, FilterSpec, InventoryError, InventoryTraversal,
    ProgressTracker, UploadReconciler,
};
use blobtally::InventoryConfig;
use blobtally_logging::LogConfig;
use chrono::Local;
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit code when the run finished but some units could not be listed
pub const EXIT_PARTIAL: u8 = 2;

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Local directory for manifest chunks
    #[arg(long = "file-list-dir", env = "FILE_LIST_DIR")]
    pub file_list_dir: Option<PathBuf>,

    /// Directory for the run log
    #[arg(long = "log-file-dir", env = "LOG_FILE_DIR")]
    pub log_file_dir: Option<PathBuf>,

    /// Container URL (with SAS) or local directory to publish to
    #[arg(long = "destination-url", env = "DESTINATION_URL")]
    pub destination_url: Option<String>,

    /// Root of the storage tree to crawl
    #[arg(long = "source-root", env = "SOURCE_ROOT")]
    pub source_root: Option<PathBuf>,

    /// YAML file restricting the crawl to listed accounts and containers
    #[arg(short = 'i', long = "yaml-input-file")]
    pub yaml_input_file: Option<PathBuf>,

    /// Publish manifests to the destination
    #[arg(short = 'u', long = "upload")]
    pub upload: bool,

    /// Ignore previous progress and start over
    #[arg(long)]
    pub fresh: bool,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Byte budget per chunk (e.g. 16MB)
    #[arg(long)]
    pub byte_budget: Option<String>,

    /// Objects per listing page
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Prefix for destination keys
    #[arg(long)]
    pub prefix: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Merge the config file with command line overrides
pub fn resolve_config(args: &ScanArgs) -> anyhow::Result<InventoryConfig> {
    let mut config = match &args.config {
        Some(path) => InventoryConfig::load(path)
            .map_err(|e| HelpfulError::invalid_config(Some(path), &e.to_string()))?,
        None => InventoryConfig::default(),
    };

    if let Some(dir) = &args.file_list_dir {
        config.output_root = dir.clone();
    }
    if let Some(dir) = &args.log_file_dir {
        config.log_dir = Some(dir.clone());
    }
    if let Some(url) = &args.destination_url {
        config.destination_url = Some(url.clone());
    }
    if let Some(root) = &args.source_root {
        config.source_root = Some(root.clone());
    }
    if let Some(file) = &args.yaml_input_file {
        config.filter_file = Some(file.clone());
    }
    if let Some(budget) = &args.byte_budget {
        config.byte_budget =
            parse_size(budget).map_err(|e| HelpfulError::invalid_size_format(&e))?;
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(prefix) = &args.prefix {
        config.destination_prefix = prefix.clone();
    }

    config
        .validate()
        .map_err(|e| HelpfulError::invalid_config(args.config.as_deref(), &e.to_string()))?;
    Ok(config)
}

/// Destination for a `DESTINATION_URL` value
pub fn destination_for(url: &str) -> anyhow::Result<Arc<dyn DestinationStore>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        let destination = BlobDestination::new(url)
            .map_err(|e| HelpfulError::invalid_config(None, &e.to_string()))?;
        Ok(Arc::new(destination))
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(Arc::new(LocalDestination::new(path)))
    }
}

/// Execute the scan command
pub fn run(args: ScanArgs, verbose: bool) -> anyhow::Result<ExitCode> {
    let config = resolve_config(&args)?;

    let source_root = config
        .source_root
        .clone()
        .ok_or_else(HelpfulError::missing_source)?;
    if !source_root.is_dir() {
        return Err(HelpfulError::source_not_found(&source_root).into());
    }

    let filter = match &config.filter_file {
        Some(path) => Some(
            FilterSpec::load(path)
                .map_err(|e| HelpfulError::invalid_filter(path, &e.to_string()))?,
        ),
        None => None,
    };

    let reconciler = if args.upload {
        let url = config
            .destination_url
            .as_deref()
            .ok_or_else(HelpfulError::missing_destination)?;
        Some(UploadReconciler::new(destination_for(url)?).with_prefix(&config.destination_prefix))
    } else {
        None
    };

    std::fs::create_dir_all(&config.output_root)?;

    match blobtally_logging::init_logging(LogConfig {
        log_dir: config.log_dir.as_deref(),
        verbose,
        started_at: Local::now(),
    }) {
        Ok(log_path) => info!(log = %log_path.display(), "Logging to file"),
        Err(e) => eprintln!("Warning: failed to initialize logging: {:#}", e),
    }

    let progress_path = config.progress_path();
    let progress = if args.fresh {
        info!(path = %progress_path.display(), "Starting with fresh progress");
        ProgressTracker::empty(progress_path)
    } else {
        ProgressTracker::open(progress_path)?
    };

    let inventory = Arc::new(LocalInventory::new(&source_root));
    let collaborators = Collaborators {
        accounts: inventory.clone(),
        keys: inventory.clone(),
        lister: inventory,
    };

    info!(
        source = %source_root.display(),
        output = %config.output_root.display(),
        upload = args.upload,
        filtered = filter.is_some(),
        "Starting inventory crawl"
    );

    let mut traversal = InventoryTraversal::new(config.to_traversal_config(), collaborators, progress)
        .with_filter(filter)
        .with_reconciler(reconciler);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = match rt.block_on(traversal.run()) {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Inventory crawl aborted");
            return Err(abort_error(e));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary_table(&summary));
    }

    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            failed = summary.failed_units.len(),
            "Some units could not be listed; rerun to retry them"
        );
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}

fn abort_error(e: InventoryError) -> anyhow::Error {
    match &e {
        InventoryError::Publish { path, .. } => HelpfulError::new(e.to_string())
            .with_context("The destination refused a chunk; completed units are kept in progress")
            .with_suggestions([
                format!("TRY: Inspect the local chunk: {}", path.display()),
                "TRY: Check the destination URL and its SAS permissions, then rerun".to_string(),
            ])
            .into(),
        _ => anyhow::Error::new(e),
    }
}
