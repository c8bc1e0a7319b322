//! Prometheus text exposition format.
//!
//! Each sample line is `name{label="value",...} value [timestamp_ms]`.
//! As in Prometheus, the label set is part of the series identity: a labelled
//! sample gets the metric name `name{k="v",...}` with labels sorted by key,
//! and its labels plus `__name__` become record metadata.
//!
//! `# HELP` / `# TYPE` comments and blank lines are skipped; lines that do
//! not match the grammar, or whose value is NaN or infinite, are reported as
//! warnings.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use qualisentinel_core::Time;
use regex::Regex;

use crate::error::Result;
use crate::report::{checked_record, IngestReport};

/// Metadata key holding the bare metric name of a labelled sample.
pub const NAME_LABEL: &str = "__name__";

const SAMPLE_PATTERN: &str = r#"^(?P<name>[a-zA-Z_:][a-zA-Z0-9_:]*)(?:\{(?P<labels>(?:[^"}]|"(?:[^"\\]|\\.)*")*)\})?\s+(?P<value>\S+)(?:\s+(?P<ts>-?\d+))?\s*$"#;
const LABEL_PATTERN: &str = r#"^\s*(?P<key>[a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*"(?P<value>(?:[^"\\]|\\.)*)"\s*(?:,|$)"#;

/// Parser for Prometheus text exposition.
#[derive(Debug, Clone)]
pub struct PrometheusParser {
    sample: Regex,
    label: Regex,
}

impl PrometheusParser {
    /// Compile the sample and label grammars.
    pub fn new() -> Result<Self> {
        Ok(Self {
            sample: Regex::new(SAMPLE_PATTERN)?,
            label: Regex::new(LABEL_PATTERN)?,
        })
    }

    /// Parse an exposition body into records for `source_id`.
    ///
    /// Samples without an explicit timestamp are stamped with `collected_at`.
    pub fn parse(&self, input: &str, content: &str, source_id: &str, collected_at: Time) -> IngestReport {
        let mut report = IngestReport::new(input);

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match self.parse_sample(line, source_id, collected_at) {
                Ok(record) => report.push(record),
                Err(reason) => report.warn(idx + 1, line, reason),
            }
        }

        tracing::debug!(
            input,
            source_id,
            records = report.records.len(),
            warnings = report.warnings.len(),
            "Parsed Prometheus exposition"
        );
        report
    }

    fn parse_sample(
        &self,
        line: &str,
        source_id: &str,
        collected_at: Time,
    ) -> std::result::Result<qualisentinel_core::MetricRecord, String> {
        let caps = self
            .sample
            .captures(line)
            .ok_or_else(|| "not a Prometheus sample line".to_string())?;

        let name = &caps["name"];
        let labels = match caps.name("labels") {
            Some(raw) => self.parse_labels(raw.as_str())?,
            None => BTreeMap::new(),
        };

        let raw_value = &caps["value"];
        let value: f64 = raw_value
            .parse()
            .map_err(|_| format!("value '{}' is not a number", raw_value))?;
        if !value.is_finite() {
            return Err(format!("non-finite sample value '{}' skipped", raw_value));
        }

        let timestamp = match caps.name("ts") {
            Some(ts) => {
                let millis: i64 = ts
                    .as_str()
                    .parse()
                    .map_err(|_| format!("timestamp '{}' is out of range", ts.as_str()))?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| format!("timestamp '{}' is out of range", millis))?
            }
            None => collected_at,
        };

        let metric_name = series_name(name, &labels);
        let mut metadata = labels;
        if !metadata.is_empty() {
            metadata.insert(NAME_LABEL.to_string(), name.to_string());
        }
        checked_record(source_id, &metric_name, value, timestamp, metadata)
    }

    fn parse_labels(&self, raw: &str) -> std::result::Result<BTreeMap<String, String>, String> {
        let mut labels = BTreeMap::new();
        let mut rest = raw.trim();

        while !rest.is_empty() {
            let caps = self
                .label
                .captures(rest)
                .ok_or_else(|| format!("malformed label set '{}'", raw))?;
            labels.insert(caps["key"].to_string(), unescape(&caps["value"]));
            let consumed = caps.get(0).map_or(rest.len(), |m| m.end());
            rest = rest[consumed..].trim_start();
        }

        Ok(labels)
    }
}

/// Canonical series name: the bare name, or `name{k="v",...}` with sorted labels.
pub fn series_name(name: &str, labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
        .collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRAPE: &str = r#"# HELP jvm_memory_used_bytes The amount of used memory
# TYPE jvm_memory_used_bytes gauge
jvm_memory_used_bytes{area="heap",id="G1 Eden Space",} 1.048576E7
jvm_memory_used_bytes{area="nonheap",id="Metaspace",} 5242880.0
system_cpu_usage 0.25
http_server_requests_seconds_max{method="GET",uri="/orders"} 0.5 1700000000000
jvm_gc_pause_seconds_sum{action="end of minor GC"} NaN
garbage line here
"#;

    fn collected() -> Time {
        Utc.timestamp_opt(1_000, 0).unwrap()
    }

    #[test]
    fn test_parse_scrape() {
        let parser = PrometheusParser::new().unwrap();
        let report = parser.parse("scrape", SCRAPE, "orders-api", collected());

        assert_eq!(report.records.len(), 4);
        assert_eq!(report.warnings.len(), 2);

        let heap = &report.records[0];
        assert_eq!(heap.source_id(), "orders-api");
        assert_eq!(heap.metric_name(), r#"jvm_memory_used_bytes{area="heap",id="G1 Eden Space"}"#);
        assert_eq!(heap.metadata()[NAME_LABEL], "jvm_memory_used_bytes");
        assert_ne!(heap.metric_name(), report.records[1].metric_name());

        let cpu = &report.records[2];
        assert_eq!(cpu.metric_name(), "system_cpu_usage");
        assert!(cpu.metadata().is_empty());
        assert_eq!(heap.value(), 10_485_760.0);
        assert_eq!(heap.metadata()["id"], "G1 Eden Space");
        assert_eq!(heap.timestamp(), collected());

        let http = &report.records[3];
        assert_eq!(http.timestamp().timestamp(), 1_700_000_000);
        assert_eq!(http.metadata()["uri"], "/orders");
    }

    #[test]
    fn test_labels_with_escapes_and_braces() {
        let parser = PrometheusParser::new().unwrap();
        let content = r#"events_total{msg="a \"quoted\" }brace",path="C:\\tmp"} 3"#;
        let report = parser.parse("x", content, "svc", collected());
        assert!(report.is_clean(), "{:?}", report.warnings);
        let record = &report.records[0];
        assert_eq!(record.metadata()["msg"], r#"a "quoted" }brace"#);
        assert_eq!(record.metadata()["path"], r"C:\tmp");
        assert_eq!(
            record.metric_name(),
            r#"events_total{msg="a \"quoted\" }brace",path="C:\\tmp"}"#
        );
    }

    #[test]
    fn test_series_name_sorts_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("uri".to_string(), "/b".to_string());
        labels.insert("method".to_string(), "GET".to_string());
        assert_eq!(series_name("reqs", &labels), r#"reqs{method="GET",uri="/b"}"#);
        assert_eq!(series_name("up", &BTreeMap::new()), "up");
    }

    #[test]
    fn test_malformed_labels_are_warnings() {
        let parser = PrometheusParser::new().unwrap();
        let report = parser.parse("x", "up{job=unquoted} 1\n", "svc", collected());
        assert!(report.records.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_empty_label_set() {
        let parser = PrometheusParser::new().unwrap();
        let report = parser.parse("x", "up{} 1\n", "svc", collected());
        assert_eq!(report.records.len(), 1);
        assert!(report.records[0].metadata().is_empty());
    }
}
