//! Ingestion adapter trait and the file/inline implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use qualisentinel_core::{Snapshot, Time};

use crate::delimited::parse_delimited;
use crate::error::{IngestError, Result};
use crate::format::InputFormat;
use crate::jsonl::parse_json_lines;
use crate::prometheus::PrometheusParser;
use crate::report::IngestReport;

/// A readable raw input.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// File on disk
    File(PathBuf),
    /// Content already read from a stream
    Inline {
        /// Label used in reports and warnings
        name: String,
        /// Raw content
        content: String,
    },
}

impl InputSource {
    /// Input backed by a file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        InputSource::File(path.as_ref().to_path_buf())
    }

    /// Input backed by in-memory content.
    pub fn inline(name: impl Into<String>, content: impl Into<String>) -> Self {
        InputSource::Inline {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Label for reports.
    pub fn name(&self) -> String {
        match self {
            InputSource::File(path) => path.display().to_string(),
            InputSource::Inline { name, .. } => name.clone(),
        }
    }

    fn default_source_id(&self) -> String {
        match self {
            InputSource::File(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("default")
                .to_string(),
            InputSource::Inline { name, .. } => name.clone(),
        }
    }
}

/// Options controlling how raw input is interpreted.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Explicit format; detected from extension or content when unset
    pub format: Option<InputFormat>,
    /// Source id for formats that do not carry one (Prometheus)
    pub source_id: Option<String>,
    /// Timestamp for samples without one; ingestion time when unset
    pub collected_at: Option<Time>,
}

impl IngestOptions {
    /// Set the format.
    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the source id.
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Set the collection instant.
    pub fn with_collected_at(mut self, collected_at: Time) -> Self {
        self.collected_at = Some(collected_at);
        self
    }
}

/// Turns a raw input into metric records.
///
/// Adapters do not touch shared state: records are handed back to the caller.
#[async_trait]
pub trait IngestAdapter: Send + Sync {
    /// Ingest one input.
    async fn ingest(&self, input: &InputSource) -> Result<IngestReport>;
}

/// Adapter for files and in-memory content in any supported format.
#[derive(Debug, Clone, Default)]
pub struct FileAdapter {
    options: IngestOptions,
}

impl FileAdapter {
    /// Create an adapter with the given options.
    pub fn new(options: IngestOptions) -> Self {
        Self { options }
    }

    /// Parse content that has already been read.
    pub fn parse(&self, input: &InputSource, content: &str) -> Result<IngestReport> {
        let name = input.name();
        let format = self
            .options
            .format
            .or_else(|| match input {
                InputSource::File(path) => InputFormat::from_path(path),
                InputSource::Inline { .. } => None,
            })
            .or_else(|| InputFormat::sniff(content));

        let Some(format) = format else {
            if content.trim().is_empty() {
                return Ok(IngestReport::new(name));
            }
            return Err(IngestError::UnsupportedFormat(format!(
                "cannot determine the format of '{}'",
                name
            )));
        };

        let report = match format {
            InputFormat::Delimited { delimiter } => parse_delimited(&name, content, delimiter)?,
            InputFormat::JsonLines => parse_json_lines(&name, content),
            InputFormat::Prometheus => {
                let source_id = self
                    .options
                    .source_id
                    .clone()
                    .unwrap_or_else(|| input.default_source_id());
                let collected_at = self.options.collected_at.unwrap_or_else(chrono::Utc::now);
                PrometheusParser::new()?.parse(&name, content, &source_id, collected_at)
            }
            InputFormat::Snapshot => parse_snapshot(&name, content)?,
        };

        tracing::info!(
            input = %name,
            %format,
            records = report.records.len(),
            warnings = report.warnings.len(),
            "Ingested input"
        );
        Ok(report)
    }
}

#[async_trait]
impl IngestAdapter for FileAdapter {
    async fn ingest(&self, input: &InputSource) -> Result<IngestReport> {
        match input {
            InputSource::File(path) => {
                let bytes = tokio::fs::read(path).await?;
                let (content, invalid) = decode_lines(&bytes);
                let mut report = self.parse(input, &content)?;
                if !invalid.is_empty() {
                    for (line, raw) in invalid {
                        report.warn(line, &raw, "invalid UTF-8");
                    }
                    report.warnings.sort_by_key(|w| w.line);
                }
                Ok(report)
            }
            InputSource::Inline { content, .. } => self.parse(input, content),
        }
    }
}

/// Decode raw bytes line by line.
///
/// Lines that are not valid UTF-8 are blanked so line numbers stay stable,
/// and returned with their 1-based number and a lossy rendering.
fn decode_lines(bytes: &[u8]) -> (String, Vec<(usize, String)>) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), Vec::new());
    }

    let mut lines = Vec::new();
    let mut invalid = Vec::new();
    for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        match std::str::from_utf8(raw) {
            Ok(line) => lines.push(line),
            Err(_) => {
                invalid.push((idx + 1, String::from_utf8_lossy(raw).trim_end().to_string()));
                lines.push("");
            }
        }
    }
    (lines.join("\n"), invalid)
}

/// Parse a persisted snapshot and emit every record it holds.
fn parse_snapshot(input: &str, content: &str) -> Result<IngestReport> {
    let snapshot: Snapshot = serde_json::from_str(content)
        .map_err(|e| IngestError::malformed(input, format!("invalid snapshot: {}", e)))?;

    let mut report = IngestReport::new(input);
    for record in snapshot.records() {
        report.push(record.clone());
    }
    tracing::debug!(input, snapshot = %snapshot.id, records = report.records.len(), "Read snapshot");
    Ok(report)
}
