//! Collaborator interfaces consumed by the traversal.
//!
//! These traits keep the crawl independent of any particular storage
//! service. Backends live in `crate::backends`.

use super::error::Result;
use super::types::{Account, AccountKey, Container, Page, RawObject};
use async_trait::async_trait;

/// Default number of objects requested per listing page
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Enumerates the storage accounts in scope.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// One page of accounts. The traversal buffers every page before it
    /// starts scanning, because the sequence cannot be restarted midway.
    async fn list_accounts(&self, cursor: Option<&str>) -> Result<Page<Account>>;
}

/// Looks up the access keys of an account.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Keys in preference order; the traversal uses the first one.
    async fn resolve_keys(&self, account: &Account) -> Result<Vec<AccountKey>>;
}

/// Lists containers and objects of an account.
///
/// Faults the caller may retry are reported as
/// `InventoryError::TransientListing`; anything else is final.
#[async_trait]
pub trait InventoryLister: Send + Sync {
    async fn list_containers(
        &self,
        account: &Account,
        key: &AccountKey,
        cursor: Option<&str>,
    ) -> Result<Page<Container>>;

    async fn list_objects(
        &self,
        account: &Account,
        key: &AccountKey,
        container: &Container,
        cursor: Option<&str>,
        max_page_size: usize,
    ) -> Result<Page<RawObject>>;
}
