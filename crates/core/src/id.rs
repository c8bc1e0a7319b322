//! Identifiers for QualiSentinel entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a persisted snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(Ulid);

impl SnapshotId {
    /// Generate a new SnapshotId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SnapshotId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identity of a series: the measured source plus the metric name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Identifier of the thing measured
    pub source_id: String,

    /// Metric name
    pub metric_name: String,
}

impl SeriesKey {
    /// Create a new series key.
    pub fn new(source_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source_id, self.metric_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_id_roundtrips_through_display() {
        let id = SnapshotId::new();
        let parsed: SnapshotId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_snapshot_ids_sort_by_creation() {
        let first = SnapshotId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = SnapshotId::new();
        assert!(first < second);
    }

    #[test]
    fn test_series_key_display() {
        let key = SeriesKey::new("orders-api", "jvm_threads_states");
        assert_eq!(key.to_string(), "orders-api/jvm_threads_states");
    }
}
