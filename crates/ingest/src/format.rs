//! Supported input formats.

use std::path::Path;

use qualisentinel_core::Snapshot;
use serde::{Deserialize, Serialize};

/// Raw input format accepted by the ingestion adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputFormat {
    /// Header-led delimited text (CSV, TSV)
    Delimited {
        /// Field separator
        delimiter: char,
    },
    /// One JSON object per line
    JsonLines,
    /// Prometheus text exposition
    Prometheus,
    /// Persisted store snapshot
    Snapshot,
}

impl InputFormat {
    /// Comma separated values.
    pub const CSV: InputFormat = InputFormat::Delimited { delimiter: ',' };

    /// Tab separated values.
    pub const TSV: InputFormat = InputFormat::Delimited { delimiter: '\t' };

    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::CSV),
            "tsv" => Some(Self::TSV),
            "jsonl" | "ndjson" => Some(InputFormat::JsonLines),
            "prom" | "txt" => Some(InputFormat::Prometheus),
            "json" => Some(InputFormat::Snapshot),
            _ => None,
        }
    }

    /// Guess the format from the content itself.
    pub fn sniff(content: &str) -> Option<Self> {
        let first = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())?;

        if first.starts_with('{') {
            // A snapshot is one document; JSON lines never parse as one
            if serde_json::from_str::<Snapshot>(content).is_ok() {
                return Some(InputFormat::Snapshot);
            }
            return Some(InputFormat::JsonLines);
        }
        if first.starts_with('#') && (first.starts_with("# HELP") || first.starts_with("# TYPE")) {
            return Some(InputFormat::Prometheus);
        }

        let header = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))?;
        if header.contains("source_id") {
            if header.contains('\t') {
                return Some(Self::TSV);
            }
            return Some(Self::CSV);
        }
        Some(InputFormat::Prometheus)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Delimited { delimiter: '\t' } => "tsv",
            InputFormat::Delimited { .. } => "delimited",
            InputFormat::JsonLines => "jsonl",
            InputFormat::Prometheus => "prometheus",
            InputFormat::Snapshot => "snapshot",
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::Delimited { delimiter: ',' } => f.write_str("csv"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::str::FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::CSV),
            "tsv" => Ok(Self::TSV),
            "jsonl" | "ndjson" | "json-lines" => Ok(InputFormat::JsonLines),
            "prometheus" | "prom" => Ok(InputFormat::Prometheus),
            "snapshot" => Ok(InputFormat::Snapshot),
            other => Err(format!(
                "unknown format '{}' (expected csv, tsv, jsonl, prometheus or snapshot)",
                other
            )),
        }
    }
}
