//! Ingestion results: parsed records plus skipped-line warnings.

use std::collections::BTreeMap;

use qualisentinel_core::{parse_timestamp, MetricRecord, Time};
use serde::{Deserialize, Serialize};

/// A line that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestWarning {
    /// 1-based line number in the input
    pub line: usize,
    /// Offending line content
    pub content: String,
    /// Why it was skipped
    pub reason: String,
}

impl std::fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.reason, self.content)
    }
}

/// Result of ingesting one input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    /// Input name (path or label)
    pub input: String,
    /// Successfully parsed records, in input order
    pub records: Vec<MetricRecord>,
    /// Skipped lines
    pub warnings: Vec<IngestWarning>,
}

impl IngestReport {
    /// Create an empty report for an input.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            records: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add a parsed record.
    pub fn push(&mut self, record: MetricRecord) {
        self.records.push(record);
    }

    /// Record a skipped line.
    pub fn warn(&mut self, line: usize, content: &str, reason: impl Into<String>) {
        let warning = IngestWarning {
            line,
            content: content.to_string(),
            reason: reason.into(),
        };
        tracing::warn!(input = %self.input, "Skipping {}", warning);
        self.warnings.push(warning);
    }

    /// Whether every line parsed.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Append another report's records and warnings.
    pub fn merge(&mut self, other: IngestReport) {
        self.records.extend(other.records);
        self.warnings.extend(other.warnings);
    }
}

/// Build a record from already-split text fields.
pub(crate) fn record_from_fields(
    source_id: &str,
    metric_name: &str,
    value: &str,
    timestamp: &str,
    metadata: BTreeMap<String, String>,
) -> Result<MetricRecord, String> {
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("value '{}' is not a number", value.trim()))?;
    let timestamp = parse_timestamp(timestamp).map_err(|e| e.to_string())?;
    checked_record(source_id, metric_name, value, timestamp, metadata)
}

/// Build a record from typed parts, enforcing non-empty identity and a finite value.
pub(crate) fn checked_record(
    source_id: &str,
    metric_name: &str,
    value: f64,
    timestamp: Time,
    metadata: BTreeMap<String, String>,
) -> Result<MetricRecord, String> {
    let source_id = source_id.trim();
    let metric_name = metric_name.trim();
    if source_id.is_empty() {
        return Err("empty source_id".to_string());
    }
    if metric_name.is_empty() {
        return Err("empty metric_name".to_string());
    }
    if !value.is_finite() {
        return Err(format!("non-finite value {}", value));
    }
    Ok(MetricRecord::new(source_id, metric_name, value, timestamp).with_metadata(metadata))
}
