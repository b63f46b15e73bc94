//! In-memory inventory and destination
//!
//! Deterministic stand-ins for the storage service, with fault injection,
//! used by tests and dry runs.

use crate::inventory::{
    Account, AccountKey, AccountSource, ConditionalPut, Container, DestinationStore,
    InventoryError, InventoryLister, KeyResolver, Page, RawObject, Result,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Kind of injected listing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone)]
struct ObjectFault {
    unit: String,
    offset: usize,
    kind: FaultKind,
    /// Remaining failures; `None` fails forever
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct MemoryAccount {
    account: Account,
    /// `None` makes key resolution fail
    keys: Option<Vec<AccountKey>>,
    containers: Vec<(String, Vec<RawObject>)>,
}

/// Accounts, containers and objects held in memory.
///
/// Object cursors are decimal offsets into the container's object list.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    accounts: Vec<MemoryAccount>,
    container_page_size: usize,
    faults: Mutex<Vec<ObjectFault>>,
    container_faults: Mutex<HashMap<String, FaultKind>>,
    object_calls: Mutex<Vec<(String, Option<String>)>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self {
            container_page_size: 2,
            ..Default::default()
        }
    }

    /// Add an account with one default key
    pub fn with_account(mut self, name: &str) -> Self {
        let id = format!(
            "/subscriptions/memory/resourceGroups/rg-{}/providers/Microsoft.Storage/storageAccounts/{}",
            name, name
        );
        self.accounts.push(MemoryAccount {
            account: Account::new(name, id),
            keys: Some(vec![AccountKey {
                name: "key1".to_string(),
                value: format!("{}-secret", name),
            }]),
            containers: Vec::new(),
        });
        self
    }

    /// Add a container (and its account, if missing)
    pub fn with_container(mut self, account: &str, container: &str, objects: Vec<RawObject>) -> Self {
        if !self.accounts.iter().any(|a| a.account.name == account) {
            self = self.with_account(account);
        }
        if let Some(entry) = self.accounts.iter_mut().find(|a| a.account.name == account) {
            entry.containers.push((container.to_string(), objects));
        }
        self
    }

    /// Make key resolution fail for `account`
    pub fn without_keys(mut self, account: &str) -> Self {
        if let Some(entry) = self.accounts.iter_mut().find(|a| a.account.name == account) {
            entry.keys = None;
        }
        self
    }

    /// Make container listing of `account` fail
    pub fn fail_containers(self, account: &str, kind: FaultKind) -> Self {
        if let Ok(mut faults) = self.container_faults.lock() {
            faults.insert(account.to_string(), kind);
        }
        self
    }

    /// Fail the object page starting at `offset` of `account/container`.
    ///
    /// `times: None` fails every request for that page.
    pub fn fail_objects_at(
        &self,
        account: &str,
        container: &str,
        offset: usize,
        kind: FaultKind,
        times: Option<u32>,
    ) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(ObjectFault {
                unit: format!("{}/{}", account, container),
                offset,
                kind,
                remaining: times,
            });
        }
    }

    /// Remove every injected object fault
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// `(unit, cursor)` of every object listing request so far
    pub fn object_calls(&self) -> Vec<(String, Option<String>)> {
        self.object_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn find(&self, account: &str) -> Result<&MemoryAccount> {
        self.accounts
            .iter()
            .find(|a| a.account.name == account)
            .ok_or_else(|| InventoryError::listing(account, "no such account"))
    }

    fn take_fault(&self, unit: &str, offset: usize) -> Option<FaultKind> {
        let mut faults = self.faults.lock().ok()?;
        let fault = faults
            .iter_mut()
            .find(|f| f.unit == unit && f.offset == offset && f.remaining != Some(0))?;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(fault.kind)
    }
}

fn parse_offset(scope: &str, cursor: Option<&str>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| InventoryError::listing(scope, format!("bad cursor '{}'", value))),
    }
}

fn fault_error(kind: FaultKind, scope: &str) -> InventoryError {
    match kind {
        FaultKind::Transient => InventoryError::transient(scope, "injected transient fault"),
        FaultKind::Permanent => InventoryError::listing(scope, "injected permanent fault"),
    }
}

#[async_trait]
impl AccountSource for MemoryInventory {
    async fn list_accounts(&self, _cursor: Option<&str>) -> Result<Page<Account>> {
        Ok(Page::last(
            self.accounts.iter().map(|a| a.account.clone()).collect(),
        ))
    }
}

#[async_trait]
impl KeyResolver for MemoryInventory {
    async fn resolve_keys(&self, account: &Account) -> Result<Vec<AccountKey>> {
        self.find(&account.name)?
            .keys
            .clone()
            .ok_or_else(|| InventoryError::KeyResolution {
                account: account.name.clone(),
                message: "access denied".to_string(),
            })
    }
}

#[async_trait]
impl InventoryLister for MemoryInventory {
    async fn list_containers(
        &self,
        account: &Account,
        _key: &AccountKey,
        cursor: Option<&str>,
    ) -> Result<Page<Container>> {
        let fault = self
            .container_faults
            .lock()
            .ok()
            .and_then(|faults| faults.get(&account.name).copied());
        if let Some(kind) = fault {
            return Err(fault_error(kind, &account.name));
        }

        let entry = self.find(&account.name)?;
        let offset = parse_offset(&account.name, cursor)?;
        let end = (offset + self.container_page_size.max(1)).min(entry.containers.len());
        let items = entry.containers[offset.min(end)..end]
            .iter()
            .map(|(name, _)| Container::new(&account.name, name))
            .collect();
        let continuation = (end < entry.containers.len()).then(|| end.to_string());
        Ok(Page {
            items,
            continuation,
        })
    }

    async fn list_objects(
        &self,
        account: &Account,
        _key: &AccountKey,
        container: &Container,
        cursor: Option<&str>,
        max_page_size: usize,
    ) -> Result<Page<RawObject>> {
        let unit = container.unit_key();
        if let Ok(mut calls) = self.object_calls.lock() {
            calls.push((unit.clone(), cursor.map(str::to_string)));
        }

        let offset = parse_offset(&unit, cursor)?;
        if let Some(kind) = self.take_fault(&unit, offset) {
            return Err(fault_error(kind, &unit));
        }

        let entry = self.find(&account.name)?;
        let objects = entry
            .containers
            .iter()
            .find(|(name, _)| *name == container.name)
            .map(|(_, objects)| objects)
            .ok_or_else(|| InventoryError::listing(&unit, "no such container"))?;

        let end = (offset + max_page_size.max(1)).min(objects.len());
        let items = objects[offset.min(end)..end].to_vec();
        let continuation = (end < objects.len()).then(|| end.to_string());
        Ok(Page {
            items,
            continuation,
        })
    }
}

/// Objects named `{prefix}{index:06}` with fixed timestamps
pub fn synthetic_objects(prefix: &str, count: usize) -> Vec<RawObject> {
    let created = Utc
        .with_ymd_and_hms(2023, 6, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    let modified = Utc
        .with_ymd_and_hms(2024, 1, 15, 8, 30, 0)
        .single()
        .unwrap_or_default();
    (0..count)
        .map(|i| RawObject {
            name: format!("{}{:06}", prefix, i),
            resource_type: None,
            created_on: created,
            last_modified: modified,
            content_length: (i as u64 % 9) + 1,
            content_md5: Some(vec![i as u8; 16]),
            access_tier: Some("Hot".to_string()),
        })
        .collect()
}

/// Destination holding published objects in memory
#[derive(Debug, Default)]
pub struct MemoryDestination {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    reject: Mutex<Option<String>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), data);
        }
    }

    /// Answer every later put with `ConditionalPut::Other(detail)`
    pub fn reject_all(&self, detail: &str) {
        if let Ok(mut reject) = self.reject.lock() {
            *reject = Some(detail.to_string());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    async fn put_if_absent(&self, key: &str, local: &Path) -> Result<ConditionalPut> {
        if let Some(detail) = self.reject.lock().ok().and_then(|r| r.clone()) {
            return Ok(ConditionalPut::Other(detail));
        }
        let data = tokio::fs::read(local).await?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| InventoryError::Destination("destination lock poisoned".to_string()))?;
        match objects.get(key) {
            Some(existing) if existing.len() == data.len() => {
                Ok(ConditionalPut::AlreadyExistsSameSize)
            }
            Some(existing) => Ok(ConditionalPut::Other(format!(
                "object exists with {} bytes, local chunk has {}",
                existing.len(),
                data.len()
            ))),
            None => {
                objects.insert(key.to_string(), data);
                Ok(ConditionalPut::Created)
            }
        }
    }

    fn describe(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AccountKey {
        AccountKey {
            name: "key1".to_string(),
            value: "v".to_string(),
        }
    }

    #[tokio::test]
    async fn test_object_paging_and_end_of_listing() {
        let inventory =
            MemoryInventory::new().with_container("a", "c", synthetic_objects("o", 5));
        let account = Account::new("a", "a");
        let container = Container::new("a", "c");

        let first = inventory
            .list_objects(&account, &key(), &container, None, 2)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.continuation.as_deref(), Some("2"));

        let last = inventory
            .list_objects(&account, &key(), &container, Some("4"), 2)
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.is_last());
    }

    #[tokio::test]
    async fn test_fault_expires_after_times() {
        let inventory =
            MemoryInventory::new().with_container("a", "c", synthetic_objects("o", 3));
        inventory.fail_objects_at("a", "c", 0, FaultKind::Transient, Some(1));
        let account = Account::new("a", "a");
        let container = Container::new("a", "c");

        let err = inventory
            .list_objects(&account, &key(), &container, None, 10)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(inventory
            .list_objects(&account, &key(), &container, None, 10)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_containers_are_paged() {
        let inventory = MemoryInventory::new()
            .with_container("a", "c1", vec![])
            .with_container("a", "c2", vec![])
            .with_container("a", "c3", vec![]);
        let account = Account::new("a", "a");
        let page = inventory.list_containers(&account, &key(), None).await.unwrap();
        assert_eq!(page.items.len(), 2);
        let rest = inventory
            .list_containers(&account, &key(), page.continuation.as_deref())
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert!(rest.is_last());
    }
}
