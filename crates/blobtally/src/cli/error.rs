//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// No source to crawl was configured
    pub fn missing_source() -> Self {
        Self::new("No inventory source configured")
            .with_context("The crawl needs a storage root to enumerate accounts from")
            .with_suggestions([
                "TRY: Pass the storage root: blobtally scan --source-root /srv/storage",
                "TRY: Set SOURCE_ROOT in the environment",
                "TRY: Add source_root to the --config file",
            ])
    }

    /// Source root does not exist or is not a directory
    pub fn source_not_found(path: &Path) -> Self {
        Self::new(format!("Source root not found: {}", path.display()))
            .with_context("Each account must be a directory under the source root")
            .with_suggestion(format!("TRY: Check that the path exists: ls -la {}", path.display()))
    }

    /// `--upload` without a destination
    pub fn missing_destination() -> Self {
        Self::new("Upload requested but no destination configured")
            .with_context("Chunks are published to DESTINATION_URL when --upload is set")
            .with_suggestions([
                "TRY: blobtally scan -u --destination-url 'https://acct.blob.core.windows.net/inventory?<sas>'",
                "TRY: Use a local directory: --destination-url /mnt/inventory",
                "TRY: Drop -u to keep the manifests local",
            ])
    }

    /// Config file failed to load or validate
    pub fn invalid_config(path: Option<&Path>, detail: &str) -> Self {
        let err = Self::new(format!("Invalid configuration: {}", detail));
        match path {
            Some(path) => err
                .with_context(format!("While reading {}", path.display()))
                .with_suggestion("TRY: Check the TOML syntax and field names"),
            None => err.with_suggestion("TRY: Check the command line flags"),
        }
    }

    /// Filter file failed to load or validate
    pub fn invalid_filter(path: &Path, detail: &str) -> Self {
        Self::new(format!("Invalid filter file: {}", path.display()))
            .with_context(detail.to_string())
            .with_suggestions([
                "TRY: Each entry needs a name, and containers must be a non-empty list",
                "TRY: Example:\n    accounts:\n      - name: acct\n        containers: [logs, data]",
            ])
    }

    /// Size flag could not be parsed
    pub fn invalid_size_format(size_str: &str) -> Self {
        Self::new(format!("Invalid size format: '{}'", size_str))
            .with_context("Size must be a number followed by an optional unit")
            .with_suggestions([
                "TRY: Use formats like: 16000000, 500KB, 16MB, 1GB",
                "TRY: Units are decimal: 1MB = 1,000,000 bytes",
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}
