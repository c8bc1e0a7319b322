//! HTTP collector for Spring Boot Actuator style management endpoints.

use std::time::Duration;

use qualisentinel_core::Time;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;

use crate::error::{IngestError, Result};
use crate::prometheus::PrometheusParser;
use crate::report::IngestReport;

const PROMETHEUS_PATH: &str = "/actuator/prometheus";
const TRACE_PATHS: [&str; 2] = ["/actuator/httptrace", "/actuator/http-trace"];
const TRACE_LIST_KEYS: [&str; 4] = ["traces", "content", "items", "values"];

/// Scrapes metrics and HTTP traces from a target application.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    base_url: String,
    source_id: String,
}

impl HttpCollector {
    /// Create a collector for `base_url` (e.g. `http://localhost:8088`).
    pub fn new(base_url: impl Into<String>, source_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            source_id: source_id.into(),
        })
    }

    /// Management base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Source id stamped on scraped records.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Scrape the Prometheus endpoint into records stamped with `collected_at`.
    pub async fn scrape(&self, collected_at: Time) -> Result<IngestReport> {
        let url = format!("{}{}", self.base_url, PROMETHEUS_PATH);
        tracing::debug!(%url, "Scraping metrics");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let body = response.text().await?;

        let report = PrometheusParser::new()?.parse(&url, &body, &self.source_id, collected_at);
        tracing::info!(
            %url,
            records = report.records.len(),
            warnings = report.warnings.len(),
            "Scraped metrics"
        );
        Ok(report)
    }

    /// Fetch HTTP traces.
    ///
    /// Endpoints are tried in order; a 404 moves on to the next one. When no
    /// endpoint is exposed the result is an empty list.
    pub async fn fetch_traces(&self) -> Result<Vec<JsonValue>> {
        for path in TRACE_PATHS {
            let url = format!("{}{}", self.base_url, path);
            let response = self.client.get(&url).send().await?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                tracing::debug!(%url, "Trace endpoint not exposed");
                continue;
            }
            if !status.is_success() {
                return Err(IngestError::UnexpectedStatus {
                    url,
                    status: status.as_u16(),
                });
            }

            let body = response.text().await?;
            let value: JsonValue = serde_json::from_str(&body)
                .map_err(|e| IngestError::malformed(&url, format!("response is not JSON: {}", e)))?;
            let traces = extract_traces(value);
            tracing::info!(%url, traces = traces.len(), "Fetched HTTP traces");
            return Ok(traces);
        }

        tracing::warn!(base_url = %self.base_url, "No HTTP trace endpoint exposed");
        Ok(Vec::new())
    }
}

/// Pull the trace list out of a trace endpoint response.
///
/// Accepts a bare array or an object carrying the list under `traces`,
/// `content`, `items` or `values`. Anything else yields an empty list.
pub fn extract_traces(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => {
            if let Some(traces) = map.remove("traces") {
                return match traces {
                    JsonValue::Array(items) => items,
                    _ => Vec::new(),
                };
            }
            TRACE_LIST_KEYS[1..]
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(JsonValue::Array(items)) => Some(items),
                    _ => None,
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}
