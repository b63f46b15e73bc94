//! Concrete account sources, listers and destinations

pub mod blob;
pub mod local;
pub mod memory;

pub use blob::BlobDestination;
pub use local::{LocalDestination, LocalInventory};
pub use memory::{FaultKind, MemoryDestination, MemoryInventory};
