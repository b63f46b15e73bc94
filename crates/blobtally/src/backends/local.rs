//! Filesystem-backed inventory and destination
//!
//! Layout of a local inventory root:
//!
//! ```text
//! {root}/{account}/account.json        optional: {"id": "...", "keys": [...]}
//! {root}/{account}/{container}/...     objects, any depth
//! ```
//!
//! Object names are paths relative to the container with `/` separators.
//! Listings are sorted by name and the cursor is the last name returned.

use crate::inventory::{
    Account, AccountKey, AccountSource, ConditionalPut, Container, DestinationStore,
    InventoryError, InventoryLister, KeyResolver, Page, RawObject, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use walkdir::WalkDir;

/// Account descriptor file name
pub const ACCOUNT_DESCRIPTOR: &str = "account.json";

#[derive(Debug, Default, Deserialize)]
struct AccountDescriptor {
    id: Option<String>,
    keys: Option<Vec<AccountKey>>,
}

#[derive(Debug, Clone)]
struct LocalObject {
    name: String,
    object: RawObject,
}

/// Inventory read from a directory tree
#[derive(Debug)]
pub struct LocalInventory {
    root: PathBuf,
    listings: Mutex<HashMap<String, Arc<Vec<LocalObject>>>>,
}

impl LocalInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            listings: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn descriptor(&self, account: &str) -> Result<AccountDescriptor> {
        let path = self.root.join(account).join(ACCOUNT_DESCRIPTOR);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AccountDescriptor::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sorted object listing of a container, walked once and cached until
    /// its last page is served
    fn objects(&self, container: &Container) -> Result<Arc<Vec<LocalObject>>> {
        let unit = container.unit_key();
        if let Some(cached) = self.listings.lock().ok().and_then(|l| l.get(&unit).cloned()) {
            return Ok(cached);
        }

        let dir = self.root.join(&container.account).join(&container.name);
        let mut objects = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1) {
            let entry = entry.map_err(|e| walk_error(&unit, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| walk_error(&unit, e))?;
            let relative = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
            let name = object_name(relative);
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            let created = metadata
                .created()
                .map(DateTime::<Utc>::from)
                .unwrap_or(modified);
            objects.push(LocalObject {
                name: name.clone(),
                object: RawObject {
                    name,
                    resource_type: None,
                    created_on: created,
                    last_modified: modified,
                    content_length: metadata.len(),
                    content_md5: None,
                    access_tier: Some("Hot".to_string()),
                },
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(unit = %unit, objects = objects.len(), "Walked local container");

        let objects = Arc::new(objects);
        if let Ok(mut listings) = self.listings.lock() {
            listings.insert(unit, Arc::clone(&objects));
        }
        Ok(objects)
    }

    /// Drop the cached listing once its last page has been served
    fn forget(&self, container: &Container) {
        if let Ok(mut listings) = self.listings.lock() {
            listings.remove(&container.unit_key());
        }
    }

    #[cfg(test)]
    fn cached_units(&self) -> usize {
        self.listings.lock().map(|l| l.len()).unwrap_or_default()
    }
}

/// Relative path with `/` separators
fn object_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_error(scope: &str, e: walkdir::Error) -> InventoryError {
    match e.io_error().map(io::Error::kind) {
        Some(io::ErrorKind::Interrupted) | Some(io::ErrorKind::TimedOut) => {
            InventoryError::transient(scope, e.to_string())
        }
        _ => InventoryError::listing(scope, e.to_string()),
    }
}

fn io_listing_error(scope: &str, e: io::Error) -> InventoryError {
    match e.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
            InventoryError::transient(scope, e.to_string())
        }
        _ => InventoryError::listing(scope, e.to_string()),
    }
}

/// Sorted names of the subdirectories of `dir`
fn subdirectories(scope: &str, dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_listing_error(scope, e))? {
        let entry = entry.map_err(|e| io_listing_error(scope, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl AccountSource for LocalInventory {
    async fn list_accounts(&self, _cursor: Option<&str>) -> Result<Page<Account>> {
        let mut accounts = Vec::new();
        for name in subdirectories("accounts", &self.root)? {
            // An unreadable descriptor surfaces at key resolution
            let id = self
                .descriptor(&name)
                .ok()
                .and_then(|d| d.id)
                .unwrap_or_else(|| {
                    format!(
                        "/subscriptions/local/resourceGroups/local/providers/Microsoft.Storage/storageAccounts/{}",
                        name
                    )
                });
            accounts.push(Account::new(name, id));
        }
        Ok(Page::last(accounts))
    }
}

#[async_trait]
impl KeyResolver for LocalInventory {
    async fn resolve_keys(&self, account: &Account) -> Result<Vec<AccountKey>> {
        let descriptor =
            self.descriptor(&account.name)
                .map_err(|e| InventoryError::KeyResolution {
                    account: account.name.clone(),
                    message: e.to_string(),
                })?;
        Ok(descriptor.keys.unwrap_or_else(|| {
            vec![AccountKey {
                name: "key1".to_string(),
                value: "local".to_string(),
            }]
        }))
    }
}

#[async_trait]
impl InventoryLister for LocalInventory {
    async fn list_containers(
        &self,
        account: &Account,
        _key: &AccountKey,
        _cursor: Option<&str>,
    ) -> Result<Page<Container>> {
        let names = subdirectories(&account.name, &self.root.join(&account.name))?;
        Ok(Page::last(
            names
                .into_iter()
                .map(|name| Container::new(&account.name, name))
                .collect(),
        ))
    }

    async fn list_objects(
        &self,
        _account: &Account,
        _key: &AccountKey,
        container: &Container,
        cursor: Option<&str>,
        max_page_size: usize,
    ) -> Result<Page<RawObject>> {
        let objects = self.objects(container)?;
        let start = match cursor {
            Some(after) => objects.partition_point(|o| o.name.as_str() <= after),
            None => 0,
        };
        let end = (start + max_page_size.max(1)).min(objects.len());
        let items: Vec<RawObject> = objects[start..end].iter().map(|o| o.object.clone()).collect();
        let continuation = if end < objects.len() {
            items.last().map(|o| o.name.clone())
        } else {
            self.forget(container);
            None
        };
        Ok(Page {
            items,
            continuation,
        })
    }
}

/// Destination directory; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, key: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            path.push(segment);
        }
        Some(path)
    }
}

#[async_trait]
impl DestinationStore for LocalDestination {
    async fn put_if_absent(&self, key: &str, local: &Path) -> Result<ConditionalPut> {
        let Some(target) = self.target(key) else {
            return Ok(ConditionalPut::Other(format!("invalid destination key '{}'", key)));
        };
        let local_len = tokio::fs::metadata(local).await?.len();

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = target.with_file_name(format!(".{}.tmp", file_name));
        tokio::fs::copy(local, &staging).await?;

        // hard_link refuses to replace an existing target
        let linked = tokio::fs::hard_link(&staging, &target).await;
        let _ = tokio::fs::remove_file(&staging).await;
        match linked {
            Ok(()) => Ok(ConditionalPut::Created),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let existing = tokio::fs::metadata(&target).await?.len();
                if existing == local_len {
                    Ok(ConditionalPut::AlreadyExistsSameSize)
                } else {
                    Ok(ConditionalPut::Other(format!(
                        "{} exists with {} bytes, local chunk has {}",
                        target.display(),
                        existing,
                        local_len
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self, key: &str) -> String {
        self.target(key)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn key() -> AccountKey {
        AccountKey {
            name: "key1".to_string(),
            value: "local".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lists_accounts_and_containers_sorted() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("beta/logs/a.txt"), "a");
        write(&temp.path().join("alpha/data/b.txt"), "b");
        write(&temp.path().join("alpha/archive/c.txt"), "c");
        let inventory = LocalInventory::new(temp.path());

        let accounts = inventory.list_accounts(None).await.unwrap();
        let names: Vec<_> = accounts.items.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(accounts.items[0].resource_group(), Some("local"));

        let containers = inventory
            .list_containers(&accounts.items[0], &key(), None)
            .await
            .unwrap();
        let names: Vec<_> = containers.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["archive", "data"]);
    }

    #[tokio::test]
    async fn test_object_pages_use_name_cursor() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("acct/c/a-b"), "1");
        write(&temp.path().join("acct/c/a/b"), "22");
        write(&temp.path().join("acct/c/z"), "333");
        let inventory = LocalInventory::new(temp.path());
        let account = Account::new("acct", "acct");
        let container = Container::new("acct", "c");

        let first = inventory
            .list_objects(&account, &key(), &container, None, 2)
            .await
            .unwrap();
        let names: Vec<_> = first.items.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a-b", "a/b"]);
        assert_eq!(first.continuation.as_deref(), Some("a/b"));
        assert_eq!(first.items[1].content_length, 2);

        let rest = inventory
            .list_objects(&account, &key(), &container, first.continuation.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].name, "z");
        assert!(rest.is_last());
    }

    #[tokio::test]
    async fn test_listing_cache_released_after_last_page() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("acct/c/one"), "1");
        write(&temp.path().join("acct/c/two"), "2");
        write(&temp.path().join("acct/d/three"), "3");
        let inventory = LocalInventory::new(temp.path());
        let account = Account::new("acct", "acct");
        let c = Container::new("acct", "c");
        let d = Container::new("acct", "d");

        let first = inventory.list_objects(&account, &key(), &c, None, 1).await.unwrap();
        assert!(!first.is_last());
        assert_eq!(inventory.cached_units(), 1);

        let last = inventory
            .list_objects(&account, &key(), &c, first.continuation.as_deref(), 1)
            .await
            .unwrap();
        assert!(last.is_last());
        assert_eq!(inventory.cached_units(), 0);

        // A single-page container is never left behind either
        let only = inventory.list_objects(&account, &key(), &d, None, 10).await.unwrap();
        assert_eq!(only.items.len(), 1);
        assert_eq!(inventory.cached_units(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_descriptor_fails_key_resolution() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("acct/account.json"), "{not json");
        let inventory = LocalInventory::new(temp.path());
        let err = inventory
            .resolve_keys(&Account::new("acct", "acct"))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::KeyResolution { .. }));
    }

    #[tokio::test]
    async fn test_destination_is_create_if_absent() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("chunk.csv");
        write(&local, "header\r\nrow\r\n");
        let destination = LocalDestination::new(temp.path().join("dest"));

        let first = destination.put_if_absent("a/c/r-0.csv", &local).await.unwrap();
        assert_eq!(first, ConditionalPut::Created);
        let second = destination.put_if_absent("a/c/r-0.csv", &local).await.unwrap();
        assert_eq!(second, ConditionalPut::AlreadyExistsSameSize);

        write(&local, "header\r\nrow\r\nmore\r\n");
        let third = destination.put_if_absent("a/c/r-0.csv", &local).await.unwrap();
        assert!(matches!(third, ConditionalPut::Other(_)));
        assert!(!temp.path().join("dest/a/c/.r-0.csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_destination_rejects_escaping_keys() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("chunk.csv");
        write(&local, "x");
        let destination = LocalDestination::new(temp.path().join("dest"));
        let outcome = destination.put_if_absent("../x.csv", &local).await.unwrap();
        assert!(matches!(outcome, ConditionalPut::Other(_)));
    }
}
