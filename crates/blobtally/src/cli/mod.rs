//! CLI command handlers

pub mod error;
pub mod output;
pub mod scan;
pub mod status;
