//! Ingestion adapters for QualiSentinel.
//!
//! Raw inputs (delimited text, JSON lines, Prometheus text exposition and
//! persisted snapshots) are turned into metric records. Unparsable lines are
//! skipped and reported as warnings instead of failing the whole input.

#![warn(missing_docs)]

pub mod adapter;
pub mod collector;
pub mod delimited;
pub mod error;
pub mod format;
pub mod jsonl;
pub mod prometheus;
pub mod report;

pub use adapter::{FileAdapter, IngestAdapter, IngestOptions, InputSource};
pub use collector::{extract_traces, HttpCollector};
pub use error::{IngestError, Result};
pub use format::InputFormat;
pub use prometheus::{series_name, PrometheusParser, NAME_LABEL};
pub use report::{IngestReport, IngestWarning};
