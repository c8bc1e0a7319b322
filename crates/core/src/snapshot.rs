//! Snapshot model - the persisted form of a set of series.

use serde::{Deserialize, Serialize};

use crate::id::SnapshotId;
use crate::record::MetricRecord;
use crate::series::MetricSeries;
use crate::Time;

/// A point-in-time copy of every series in a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier
    pub id: SnapshotId,

    /// When it was taken
    pub taken_at: Time,

    /// Captured series
    pub series: Vec<MetricSeries>,
}

impl Snapshot {
    /// Create a snapshot of the given series.
    pub fn new(series: Vec<MetricSeries>) -> Self {
        Self {
            id: SnapshotId::new(),
            taken_at: chrono::Utc::now(),
            series,
        }
    }

    /// Total number of records across all series.
    pub fn record_count(&self) -> usize {
        self.series.iter().map(MetricSeries::len).sum()
    }

    /// Every record of every series.
    pub fn records(&self) -> impl Iterator<Item = &MetricRecord> + '_ {
        self.series.iter().flat_map(|s| s.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SeriesKey;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_snapshot_counts_records() {
        let ts = |s| Utc.timestamp_opt(s, 0).unwrap();
        let a = MetricSeries::from_records(
            SeriesKey::new("a", "m"),
            vec![MetricRecord::new("a", "m", 1.0, ts(1)), MetricRecord::new("a", "m", 2.0, ts(2))],
        )
        .unwrap();
        let b = MetricSeries::from_records(
            SeriesKey::new("b", "m"),
            vec![MetricRecord::new("b", "m", 3.0, ts(1))],
        )
        .unwrap();

        let snapshot = Snapshot::new(vec![a, b]);
        assert_eq!(snapshot.record_count(), 3);
        assert_eq!(snapshot.records().map(|r| r.value()).sum::<f64>(), 6.0);
    }

    #[test]
    fn test_snapshot_json_roundtrip_preserves_series() {
        let ts = Utc.timestamp_opt(10, 0).unwrap();
        let series = MetricSeries::from_records(
            SeriesKey::new("svc", "cpu"),
            vec![MetricRecord::new("svc", "cpu", 0.5, ts).with_tag("host", "n1")],
        )
        .unwrap();
        let snapshot = Snapshot::new(vec![series]);

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, snapshot.id);
        assert_eq!(back.series[0].key(), &SeriesKey::new("svc", "cpu"));
        assert_eq!(back.series[0].latest().unwrap().metadata()["host"], "n1");
    }
}
