//! Blobtally: storage inventory crawler
//!
//! Walks every storage account, container and object reachable through the
//! configured source, writes byte-bounded CSV manifests per container, and
//! publishes them idempotently to a destination store.

pub mod backends;
pub mod config;
pub mod inventory;

pub use config::InventoryConfig;
pub use inventory::{InventoryError, InventoryTraversal, Result, RunSummary};
