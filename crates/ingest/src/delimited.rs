//! Header-led delimited text (CSV, TSV).
//!
//! The header names the columns `source_id`, `metric_name`, `value` and
//! `timestamp` in any order, plus an optional `metadata` column holding
//! `key=value` pairs separated by `;`. Quoting is not supported.

use std::collections::BTreeMap;

use crate::error::{IngestError, Result};
use crate::report::{record_from_fields, IngestReport};

const REQUIRED: [&str; 4] = ["source_id", "metric_name", "value", "timestamp"];

struct Columns {
    source_id: usize,
    metric_name: usize,
    value: usize,
    timestamp: usize,
    metadata: Option<usize>,
    width: usize,
}

impl Columns {
    fn from_header(input: &str, header: &str, delimiter: char) -> Result<Self> {
        let names: Vec<String> = header
            .split(delimiter)
            .map(|h| h.trim().to_lowercase())
            .collect();
        let find = |name: &str| names.iter().position(|n| n == name);

        let missing: Vec<&str> = REQUIRED.iter().copied().filter(|c| find(c).is_none()).collect();
        if !missing.is_empty() {
            return Err(IngestError::malformed(
                input,
                format!("header is missing column(s): {}", missing.join(", ")),
            ));
        }

        // All required columns are present at this point
        let col = |name: &str| find(name).unwrap_or_default();
        let source_id = col("source_id");
        let metric_name = col("metric_name");
        let value = col("value");
        let timestamp = col("timestamp");
        let metadata = find("metadata");
        let width = [source_id, metric_name, value, timestamp]
            .into_iter()
            .max()
            .unwrap_or_default()
            + 1;

        Ok(Self {
            source_id,
            metric_name,
            value,
            timestamp,
            metadata,
            width,
        })
    }
}

/// Parse delimited text.
///
/// Fails only when a non-empty input has no usable header; bad data lines are
/// reported as warnings.
pub fn parse_delimited(input: &str, content: &str, delimiter: char) -> Result<IngestReport> {
    let mut report = IngestReport::new(input);
    let mut columns: Option<Columns> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        if columns.is_none() {
            columns = Some(Columns::from_header(input, line, delimiter)?);
            continue;
        }
        let Some(cols) = columns.as_ref() else {
            continue;
        };

        let fields: Vec<&str> = line.split(delimiter).collect();
        if fields.len() < cols.width {
            report.warn(
                line_no,
                line,
                format!("expected at least {} fields, found {}", cols.width, fields.len()),
            );
            continue;
        }

        let metadata = match cols.metadata.and_then(|i| fields.get(i)) {
            Some(raw) => match parse_metadata(raw) {
                Ok(m) => m,
                Err(reason) => {
                    report.warn(line_no, line, reason);
                    continue;
                }
            },
            None => BTreeMap::new(),
        };

        match record_from_fields(
            fields[cols.source_id],
            fields[cols.metric_name],
            fields[cols.value],
            fields[cols.timestamp],
            metadata,
        ) {
            Ok(record) => report.push(record),
            Err(reason) => report.warn(line_no, line, reason),
        }
    }

    tracing::debug!(
        input,
        records = report.records.len(),
        warnings = report.warnings.len(),
        "Parsed delimited input"
    );
    Ok(report)
}

/// Parse `key=value;key=value` metadata.
fn parse_metadata(raw: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    let mut metadata = BTreeMap::new();
    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("metadata entry '{}' is not key=value", pair));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("metadata entry '{}' has an empty key", pair));
        }
        metadata.insert(key.to_string(), value.trim().to_string());
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_csv() {
        let content = "\
source_id,metric_name,value,timestamp,metadata
orders-api,latency_ms,10,1,env=prod;region=eu
orders-api,latency_ms,20,2,
";
        let report = parse_delimited("metrics.csv", content, ',').unwrap();
        assert!(report.is_clean());
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].metadata()["region"], "eu");
        assert!(report.records[1].metadata().is_empty());
    }

    #[test]
    fn test_columns_in_any_order() {
        let content = "timestamp,value,metric_name,source_id\n5,1.5,cpu,svc\n";
        let report = parse_delimited("x", content, ',').unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].source_id(), "svc");
        assert_eq!(report.records[0].value(), 1.5);
    }

    #[test]
    fn test_malformed_lines_become_warnings() {
        let content = "\
source_id,metric_name,value,timestamp
svc,cpu,1,1
svc,cpu,not-a-number,2
svc,cpu
# comment
svc,cpu,3,never

svc,cpu,4,4
";
        let report = parse_delimited("x", content, ',').unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.warnings.len(), 3);
        let lines: Vec<usize> = report.warnings.iter().map(|w| w.line).collect();
        assert_eq!(lines, vec![3, 4, 6]);
    }

    #[test]
    fn test_bad_metadata_is_a_warning() {
        let content = "source_id,metric_name,value,timestamp,metadata\nsvc,cpu,1,1,oops\n";
        let report = parse_delimited("x", content, ',').unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_missing_header_columns_is_malformed() {
        let content = "source,metric,value\nsvc,cpu,1\n";
        let err = parse_delimited("x", content, ',').unwrap_err();
        assert!(matches!(err, IngestError::MalformedInput { .. }));
        assert!(err.to_string().contains("source_id"));
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let report = parse_delimited("x", "\n# only comments\n", ',').unwrap();
        assert!(report.records.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_tab_delimited() {
        let content = "source_id\tmetric_name\tvalue\ttimestamp\nsvc\tcpu\t0.5\t2024-01-01T00:00:00Z\n";
        let report = parse_delimited("x.tsv", content, '\t').unwrap();
        assert_eq!(report.records.len(), 1);
    }
}
