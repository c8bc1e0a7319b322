//! Series storage for QualiSentinel.
//!
//! This crate provides the concurrent in-memory series store and a
//! trait-based snapshot persistence layer with a JSON file implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;
pub mod retention;
pub mod store;

pub use trait_::{SnapshotStorage, StorageError, Result};
pub use json_storage::JsonSnapshotStorage;
pub use retention::RetentionPolicy;
pub use store::{AppendSummary, SeriesSnapshot, SeriesStore};
