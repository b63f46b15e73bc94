//! Inventory pipeline
//!
//! Enumerates accounts → containers → objects, writes byte-bounded CSV
//! manifests per container, publishes them, and records progress so an
//! interrupted crawl resumes where it stopped.

pub mod chunk;
pub mod error;
pub mod filter;
pub mod progress;
pub mod publish;
pub mod retry;
pub mod source;
pub mod traversal;
pub mod types;

pub use chunk::{
    chunk_key, chunk_path, serialize_records, AppendOutcome, ChunkState, ChunkWriter,
    DEFAULT_BYTE_BUDGET, HEADER_OVERHEAD, MANIFEST_HEADER,
};
pub use error::{InventoryError, Result};
pub use filter::{should_scan_account, should_scan_container, AccountFilter, FilterSpec};
pub use progress::{ProgressMap, ProgressMarker, ProgressTracker, UnitStatus};
pub use publish::{ConditionalPut, DestinationStore, PublishOutcome, UploadReconciler};
pub use retry::RetryPolicy;
pub use source::{AccountSource, InventoryLister, KeyResolver, DEFAULT_PAGE_SIZE};
pub use traversal::{
    Collaborators, InventoryTraversal, RunSummary, TraversalConfig, TraversalState, UnitScan,
};
pub use types::{Account, AccountKey, Container, ObjectRecord, Page, RawObject};
