//! QualiSentinel core data models.
//!
//! This crate defines the records, series and summaries shared by the
//! ingestion, storage, aggregation and query layers.

#![warn(missing_docs)]

mod id;
mod record;
mod series;
mod snapshot;
mod summary;

pub use id::{SeriesKey, SnapshotId};
pub use record::{parse_timestamp, MetricRecord, TimestampError};
pub use series::{AppendOutcome, MetricSeries, SeriesError};
pub use snapshot::Snapshot;
pub use summary::{
    parse_duration, DurationParseError, Summary, SummaryKind, SummaryValue, Threshold,
    ThresholdDirection, ThresholdStatus, TrendDirection,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
