//! Account/container allow-list
//!
//! The filter document is YAML:
//!
//! ```yaml
//! accounts:
//!   - name: prodlogs
//!     containers: [ingest, archive]
//!   - name: scratch        # no `containers` key: every container
//! ```

use super::error::{InventoryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One account entry of the filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFilter {
    pub name: String,
    /// `None` means every container of the account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<String>>,
}

/// Allow-list of accounts and, optionally, their containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub accounts: Vec<AccountFilter>,
}

impl FilterSpec {
    /// Load and validate a filter document
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            InventoryError::Config(format!("cannot read filter {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| InventoryError::Config(format!("filter {}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let spec: FilterSpec = serde_yaml::from_str(content)
            .map_err(|e| InventoryError::Config(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.accounts {
            if entry.name.trim().is_empty() {
                return Err(InventoryError::Config(
                    "account filter with an empty name".to_string(),
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(InventoryError::Config(format!(
                    "account '{}' is listed more than once",
                    entry.name
                )));
            }
            if let Some(containers) = &entry.containers {
                if containers.is_empty() {
                    return Err(InventoryError::Config(format!(
                        "account '{}' lists no containers; omit `containers` to scan all of them",
                        entry.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn entry(&self, account: &str) -> Option<&AccountFilter> {
        self.accounts.iter().find(|entry| entry.name == account)
    }
}

/// Whether an account should be scanned
pub fn should_scan_account(filter: Option<&FilterSpec>, account: &str) -> bool {
    match filter {
        None => true,
        Some(spec) => spec.entry(account).is_some(),
    }
}

/// Whether a container of `account` should be scanned
pub fn should_scan_container(filter: Option<&FilterSpec>, account: &str, container: &str) -> bool {
    let Some(spec) = filter else {
        return true;
    };
    match spec.entry(account) {
        None => false,
        Some(AccountFilter {
            containers: None, ..
        }) => true,
        Some(AccountFilter {
            containers: Some(allowed),
            ..
        }) => allowed.iter().any(|name| name == container),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> FilterSpec {
        FilterSpec::parse(yaml).unwrap()
    }

    #[test]
    fn test_no_filter_scans_everything() {
        assert!(should_scan_account(None, "any"));
        assert!(should_scan_container(None, "any", "thing"));
    }

    #[test]
    fn test_account_without_containers_key_scans_all_containers() {
        let filter = spec("accounts:\n  - name: A\n");
        assert!(should_scan_account(Some(&filter), "A"));
        assert!(should_scan_container(Some(&filter), "A", "x"));
        assert!(should_scan_container(Some(&filter), "A", "y"));
        assert!(!should_scan_account(Some(&filter), "B"));
        assert!(!should_scan_container(Some(&filter), "B", "x"));
    }

    #[test]
    fn test_container_restriction() {
        let filter = spec("accounts:\n  - name: A\n    containers: [x]\n");
        assert!(should_scan_container(Some(&filter), "A", "x"));
        assert!(!should_scan_container(Some(&filter), "A", "y"));
    }

    #[test]
    fn test_missing_accounts_key_is_config_error() {
        let err = FilterSpec::parse("something: else\n").unwrap_err();
        assert!(matches!(err, InventoryError::Config(_)));
    }

    #[test]
    fn test_duplicate_account_is_config_error() {
        let err = FilterSpec::parse("accounts:\n  - name: A\n  - name: A\n").unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_empty_container_list_is_config_error() {
        let err = FilterSpec::parse("accounts:\n  - name: A\n    containers: []\n").unwrap_err();
        assert!(matches!(err, InventoryError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = FilterSpec::load(Path::new("/nonexistent/filter.yaml")).unwrap_err();
        assert!(matches!(err, InventoryError::Config(_)));
    }
}
