//! Metric series - ordered history of records for one (source, metric) pair.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::SeriesKey;
use crate::record::MetricRecord;
use crate::Time;

/// Outcome of appending a record to a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendOutcome {
    /// The record was added
    Appended,
    /// An identical record already existed at that timestamp; nothing changed
    Duplicate,
    /// A different record existed at that timestamp and was superseded
    Replaced,
    /// The record is older than the retention horizon and was dropped
    Expired,
}

impl AppendOutcome {
    /// Whether the series content changed.
    pub fn changed(&self) -> bool {
        matches!(self, AppendOutcome::Appended | AppendOutcome::Replaced)
    }
}

/// Error appending to a series.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    /// Record belongs to another series
    #[error("record for {actual} cannot be appended to series {expected}")]
    KeyMismatch {
        /// Series key
        expected: SeriesKey,
        /// Record key
        actual: SeriesKey,
    },

    /// Value is NaN or infinite
    #[error("non-finite value {0} rejected")]
    NonFiniteValue(f64),
}

/// An ordered sequence of records sharing a source and metric name.
///
/// Records are ascending by timestamp and timestamps are unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSeries {
    key: SeriesKey,
    records: Vec<Arc<MetricRecord>>,
}

impl MetricSeries {
    /// Create an empty series.
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            records: Vec::new(),
        }
    }

    /// Build a series from records in any order.
    pub fn from_records(
        key: SeriesKey,
        records: impl IntoIterator<Item = MetricRecord>,
    ) -> Result<Self, SeriesError> {
        let mut series = Self::new(key);
        for record in records {
            series.append(record)?;
        }
        Ok(series)
    }

    /// Series key.
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the series has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in timestamp order.
    pub fn records(&self) -> &[Arc<MetricRecord>] {
        &self.records
    }

    /// Iterate over records in timestamp order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricRecord> + '_ {
        self.records.iter().map(|r| r.as_ref())
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&MetricRecord> {
        self.records.last().map(|r| r.as_ref())
    }

    /// Oldest record.
    pub fn earliest(&self) -> Option<&MetricRecord> {
        self.records.first().map(|r| r.as_ref())
    }

    /// Records with `timestamp <= as_of`.
    pub fn visible_at(&self, as_of: Time) -> &[Arc<MetricRecord>] {
        let end = self.records.partition_point(|r| r.timestamp() <= as_of);
        &self.records[..end]
    }

    /// Records with `from < timestamp <= to`.
    pub fn range(&self, from: Time, to: Time) -> &[Arc<MetricRecord>] {
        let start = self.records.partition_point(|r| r.timestamp() <= from);
        let end = self.records.partition_point(|r| r.timestamp() <= to);
        if start >= end {
            return &[];
        }
        &self.records[start..end]
    }

    /// Insert a record at its sorted position.
    ///
    /// A record landing on an existing timestamp is a duplicate when it is
    /// identical, otherwise it replaces the existing one.
    pub fn append(&mut self, record: MetricRecord) -> Result<AppendOutcome, SeriesError> {
        if record.source_id() != self.key.source_id || record.metric_name() != self.key.metric_name {
            return Err(SeriesError::KeyMismatch {
                expected: self.key.clone(),
                actual: record.key(),
            });
        }
        if !record.value().is_finite() {
            return Err(SeriesError::NonFiniteValue(record.value()));
        }

        // Fast path for in-order arrivals
        if self.latest().map_or(true, |last| last.timestamp() < record.timestamp()) {
            self.records.push(Arc::new(record));
            return Ok(AppendOutcome::Appended);
        }

        match self
            .records
            .binary_search_by(|r| r.timestamp().cmp(&record.timestamp()))
        {
            Ok(idx) => {
                if *self.records[idx] == record {
                    Ok(AppendOutcome::Duplicate)
                } else {
                    self.records[idx] = Arc::new(record);
                    Ok(AppendOutcome::Replaced)
                }
            }
            Err(idx) => {
                self.records.insert(idx, Arc::new(record));
                Ok(AppendOutcome::Appended)
            }
        }
    }

    /// Drop records older than `cutoff`. Returns how many were removed.
    pub fn evict_before(&mut self, cutoff: Time) -> usize {
        let end = self.records.partition_point(|r| r.timestamp() < cutoff);
        self.records.drain(..end).count()
    }

    /// Keep only the newest `max` records. Returns how many were removed.
    pub fn truncate_oldest(&mut self, max: usize) -> usize {
        let excess = self.records.len().saturating_sub(max);
        self.records.drain(..excess).count()
    }
}
