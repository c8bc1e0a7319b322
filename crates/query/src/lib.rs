//! Query and report interface (QualiSentinel).
//!
//! Read-side entry point for presentation layers: summaries, source and
//! metric listings, change detection and diagnostics.

#![warn(missing_docs)]

pub mod error;
pub mod service;

pub use error::{QueryError, Result};
pub use service::{BasicQueryService, QueryService};
