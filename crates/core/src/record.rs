//! Metric record model - one timestamped quality observation.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::id::SeriesKey;
use crate::Time;

/// A single observed quality measurement.
///
/// Records are immutable once created; fields are only reachable through
/// accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    source_id: String,
    metric_name: String,
    value: f64,
    timestamp: Time,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl MetricRecord {
    /// Create a new record without metadata.
    pub fn new(
        source_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        timestamp: Time,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            metric_name: metric_name.into(),
            value,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach metadata tags.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a single metadata tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Identifier of the thing measured.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Metric name.
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Observed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Observation instant.
    pub fn timestamp(&self) -> Time {
        self.timestamp
    }

    /// Optional tags.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Series this record belongs to.
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.source_id.clone(), self.metric_name.clone())
    }
}

/// Error parsing a timestamp.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimestampError {
    /// Empty input
    #[error("empty timestamp")]
    Empty,

    /// Neither RFC 3339 nor epoch seconds
    #[error("unrecognised timestamp '{0}': expected RFC 3339 or Unix epoch seconds")]
    Unrecognised(String),

    /// Epoch value outside the representable range
    #[error("timestamp '{0}' is out of range")]
    OutOfRange(String),
}

/// Parse a timestamp given as RFC 3339 or as Unix epoch seconds
/// (integer or fractional).
pub fn parse_timestamp(raw: &str) -> Result<Time, TimestampError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TimestampError::Empty);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(secs) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| TimestampError::OutOfRange(raw.to_string()));
    }

    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() => {
            let millis = (secs * 1000.0).round();
            if millis.abs() > i64::MAX as f64 {
                return Err(TimestampError::OutOfRange(raw.to_string()));
            }
            Utc.timestamp_millis_opt(millis as i64)
                .single()
                .ok_or_else(|| TimestampError::OutOfRange(raw.to_string()))
        }
        _ => Err(TimestampError::Unrecognised(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let record = MetricRecord::new("orders-api", "system_cpu_usage", 0.42, ts)
            .with_tag("instance", "pod-1");

        assert_eq!(record.source_id(), "orders-api");
        assert_eq!(record.metric_name(), "system_cpu_usage");
        assert_eq!(record.value(), 0.42);
        assert_eq!(record.timestamp(), ts);
        assert_eq!(record.metadata().get("instance").map(String::as_str), Some("pod-1"));
        assert_eq!(record.key(), SeriesKey::new("orders-api", "system_cpu_usage"));
    }

    #[test]
    fn test_record_serializes_without_empty_metadata() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let record = MetricRecord::new("a", "b", 1.0, ts);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("metadata").is_none());

        let back: MetricRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ts = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp_epoch_seconds() {
        assert_eq!(parse_timestamp("3").unwrap(), Utc.timestamp_opt(3, 0).unwrap());
        assert_eq!(
            parse_timestamp("1.5").unwrap(),
            Utc.timestamp_millis_opt(1500).unwrap()
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp("  "), Err(TimestampError::Empty));
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(TimestampError::Unrecognised(_))
        ));
        assert!(parse_timestamp("NaN").is_err());
    }
}
