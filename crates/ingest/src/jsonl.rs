//! JSON lines: one record object per line.

use std::collections::BTreeMap;

use qualisentinel_core::{parse_timestamp, Time};
use serde::Deserialize;

use crate::report::{checked_record, IngestReport};

/// Timestamp given either as text or as epoch seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    fn resolve(&self) -> Result<Time, String> {
        match self {
            RawTimestamp::Text(s) => parse_timestamp(s).map_err(|e| e.to_string()),
            RawTimestamp::Epoch(secs) => parse_timestamp(&secs.to_string()).map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    source_id: String,
    metric_name: String,
    value: f64,
    timestamp: RawTimestamp,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Parse JSON lines. Every line that is not a valid record object becomes a warning.
pub fn parse_json_lines(input: &str, content: &str) -> IngestReport {
    let mut report = IngestReport::new(input);

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: RawRecord = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                report.warn(idx + 1, line, format!("invalid record: {}", e));
                continue;
            }
        };

        let built = raw.timestamp.resolve().and_then(|ts| {
            checked_record(&raw.source_id, &raw.metric_name, raw.value, ts, raw.metadata)
        });
        match built {
            Ok(record) => report.push(record),
            Err(reason) => report.warn(idx + 1, line, reason),
        }
    }

    tracing::debug!(
        input,
        records = report.records.len(),
        warnings = report.warnings.len(),
        "Parsed JSON lines input"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_lines() {
        let content = r#"
{"source_id": "svc", "metric_name": "cpu", "value": 0.5, "timestamp": "2024-01-01T00:00:00Z"}
{"source_id": "svc", "metric_name": "cpu", "value": 0.7, "timestamp": 1704067260, "metadata": {"host": "n1"}}
"#;
        let report = parse_json_lines("in.jsonl", content);
        assert!(report.is_clean());
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].timestamp().timestamp(), 1_704_067_260);
        assert_eq!(report.records[1].metadata()["host"], "n1");
    }

    #[test]
    fn test_invalid_lines_are_warnings() {
        let content = r#"{"source_id": "svc", "metric_name": "cpu", "value": 1, "timestamp": 1}
not json
{"source_id": "svc", "metric_name": "cpu", "timestamp": 2}
{"source_id": "svc", "metric_name": "cpu", "value": 3, "timestamp": "soon"}
{"source_id": "", "metric_name": "cpu", "value": 3, "timestamp": 3}
{"source_id": "svc", "metric_name": "cpu", "value": 4, "timestamp": 4}"#;
        let report = parse_json_lines("in.jsonl", content);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.warnings.len(), 4);
        assert_eq!(report.warnings[0].line, 2);
    }
}
