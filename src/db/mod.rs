//! Database module for pingwatch.
//!
//! Provides SQLite target storage and drop-file ingestion.

mod ingest;
mod models;
mod store;

pub use ingest::*;
pub use models::*;
pub use store::*;
