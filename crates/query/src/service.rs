//! Query service.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use qualisentinel_aggregate::{AggregationEngine, DiagnosticReport, SentinelProfile};
use qualisentinel_core::{MetricRecord, MetricSeries, SeriesKey, Summary, SummaryKind, Time};
use qualisentinel_storage::SeriesStore;

use crate::error::{QueryError, Result};

/// Read-side interface for presentation layers.
///
/// Every call works on published series snapshots; a concurrent append is
/// either fully visible or not visible at all.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Summarize one series.
    async fn query(&self, source_id: &str, metric_name: &str, kind: &SummaryKind, as_of: Time) -> Result<Summary>;

    /// Summarize several series as one merged sequence, in the given order.
    async fn query_set(&self, keys: &[SeriesKey], kind: &SummaryKind, as_of: Time) -> Result<Summary>;

    /// Sources with at least one record.
    async fn list_sources(&self) -> BTreeSet<String>;

    /// Metric names recorded for a source; empty for an unknown source.
    async fn list_metrics(&self, source_id: &str) -> BTreeSet<String>;

    /// Current version of a series.
    async fn series_version(&self, source_id: &str, metric_name: &str) -> Result<u64>;

    /// Whether a series moved past `version`.
    async fn changed_since(&self, source_id: &str, metric_name: &str, version: u64) -> Result<bool> {
        Ok(self.series_version(source_id, metric_name).await? > version)
    }

    /// Global version, bumped on every publish into any series.
    async fn store_version(&self) -> u64;

    /// Roll up the latest visible value of every metric of a source and
    /// evaluate the sentinel rules.
    async fn diagnose(&self, source_id: &str, as_of: Time) -> Result<DiagnosticReport>;
}

/// Query service over an in-memory series store.
pub struct BasicQueryService {
    store: Arc<SeriesStore>,
    engine: AggregationEngine,
    profile: SentinelProfile,
}

impl BasicQueryService {
    /// Create a service with the default engine and JVM profile.
    pub fn new(store: Arc<SeriesStore>) -> Self {
        Self {
            store,
            engine: AggregationEngine::new(),
            profile: SentinelProfile::default(),
        }
    }

    /// Use a different sentinel profile.
    pub fn with_profile(mut self, profile: SentinelProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Use a differently tuned engine.
    pub fn with_engine(mut self, engine: AggregationEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    /// Active sentinel profile.
    pub fn profile(&self) -> &SentinelProfile {
        &self.profile
    }

    async fn load(&self, key: &SeriesKey) -> Result<Arc<MetricSeries>> {
        self.store
            .snapshot(key)
            .await
            .map(|s| s.series)
            .ok_or_else(|| QueryError::NotFound(key.clone()))
    }
}

#[async_trait]
impl QueryService for BasicQueryService {
    async fn query(&self, source_id: &str, metric_name: &str, kind: &SummaryKind, as_of: Time) -> Result<Summary> {
        let key = SeriesKey::new(source_id, metric_name);
        let series = self.load(&key).await?;
        let summary = self.engine.aggregate(&series, kind, as_of)?;
        tracing::debug!(series = %key, %kind, "Answered query");
        Ok(summary)
    }

    async fn query_set(&self, keys: &[SeriesKey], kind: &SummaryKind, as_of: Time) -> Result<Summary> {
        if keys.is_empty() {
            return Err(QueryError::InvalidRequest("no series requested".to_string()));
        }
        let mut loaded = Vec::with_capacity(keys.len());
        for key in keys {
            loaded.push(self.load(key).await?);
        }
        let refs: Vec<&MetricSeries> = loaded.iter().map(|s| s.as_ref()).collect();
        Ok(self.engine.aggregate_set(&refs, kind, as_of)?)
    }

    async fn list_sources(&self) -> BTreeSet<String> {
        self.store.sources().await
    }

    async fn list_metrics(&self, source_id: &str) -> BTreeSet<String> {
        self.store.metrics_for(source_id).await
    }

    async fn series_version(&self, source_id: &str, metric_name: &str) -> Result<u64> {
        let key = SeriesKey::new(source_id, metric_name);
        self.store
            .version(&key)
            .await
            .ok_or(QueryError::NotFound(key))
    }

    async fn store_version(&self) -> u64 {
        self.store.store_version()
    }

    async fn diagnose(&self, source_id: &str, as_of: Time) -> Result<DiagnosticReport> {
        let series = self.store.series_for(source_id).await;
        if series.is_empty() {
            return Err(QueryError::SourceNotFound(source_id.to_string()));
        }

        let latest: Vec<&MetricRecord> = series
            .iter()
            .filter_map(|s| s.visible_at(as_of).last().map(|r| r.as_ref()))
            .collect();
        let report = DiagnosticReport::build(source_id, as_of, &self.profile, latest);
        tracing::info!(
            source = source_id,
            key_metrics = report.key_metrics.len(),
            diagnostics = report.diagnostics.len(),
            "Diagnosed source"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qualisentinel_core::{SummaryValue, Threshold, ThresholdStatus};

    fn at(secs: i64) -> Time {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn service_with(records: Vec<MetricRecord>) -> BasicQueryService {
        let store = Arc::new(SeriesStore::new());
        store.append_batch(records).await;
        BasicQueryService::new(store)
    }

    #[tokio::test]
    async fn test_query_latest() {
        let service = service_with(vec![
            MetricRecord::new("ci", "coverage", 70.0, at(1)),
            MetricRecord::new("ci", "coverage", 75.0, at(2)),
        ])
        .await;

        let summary = service.query("ci", "coverage", &SummaryKind::Latest, at(10)).await.unwrap();
        assert_eq!(summary.value, SummaryValue::Latest { timestamp: at(2), value: 75.0 });
    }

    #[tokio::test]
    async fn test_unknown_series_is_not_found() {
        let service = service_with(vec![MetricRecord::new("ci", "coverage", 70.0, at(1))]).await;

        let err = service.query("ci", "latency", &SummaryKind::Latest, at(10)).await.unwrap_err();
        assert_eq!(err, QueryError::NotFound(SeriesKey::new("ci", "latency")));

        let err = service.series_version("nope", "coverage").await.unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_insufficient_data_passes_through() {
        let service = service_with(vec![MetricRecord::new("ci", "coverage", 70.0, at(5))]).await;
        let err = service.query("ci", "coverage", &SummaryKind::Latest, at(1)).await.unwrap_err();
        assert_eq!(err, QueryError::InsufficientData { kind: "latest", required: 1, available: 0 });
    }

    #[tokio::test]
    async fn test_listings() {
        let service = service_with(vec![
            MetricRecord::new("ci", "coverage", 70.0, at(1)),
            MetricRecord::new("ci", "lint_errors", 3.0, at(1)),
            MetricRecord::new("orders-api", "latency_ms", 12.0, at(1)),
        ])
        .await;

        let sources: Vec<String> = service.list_sources().await.into_iter().collect();
        assert_eq!(sources, vec!["ci", "orders-api"]);
        let metrics: Vec<String> = service.list_metrics("ci").await.into_iter().collect();
        assert_eq!(metrics, vec!["coverage", "lint_errors"]);
        assert!(service.list_metrics("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_change_detection() {
        let service = service_with(vec![MetricRecord::new("ci", "coverage", 70.0, at(1))]).await;
        let seen = service.series_version("ci", "coverage").await.unwrap();
        assert!(!service.changed_since("ci", "coverage", seen).await.unwrap());

        let global = service.store_version().await;
        service.store().append(MetricRecord::new("ci", "coverage", 72.0, at(2))).await.unwrap();
        assert!(service.changed_since("ci", "coverage", seen).await.unwrap());
        assert!(service.store_version().await > global);
    }

    #[tokio::test]
    async fn test_query_set() {
        let service = service_with(vec![
            MetricRecord::new("a", "cov", 1.0, at(5)),
            MetricRecord::new("b", "cov", 2.0, at(5)),
        ])
        .await;
        let keys = vec![SeriesKey::new("a", "cov"), SeriesKey::new("b", "cov")];
        let summary = service.query_set(&keys, &SummaryKind::Latest, at(5)).await.unwrap();
        assert_eq!(summary.value, SummaryValue::Latest { timestamp: at(5), value: 2.0 });

        assert!(matches!(
            service.query_set(&[], &SummaryKind::Latest, at(5)).await,
            Err(QueryError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_threshold_query() {
        let service = service_with(vec![
            MetricRecord::new("svc", "errors", 10.0, at(1)),
            MetricRecord::new("svc", "errors", 30.0, at(3)),
        ])
        .await;
        let kind = SummaryKind::ThresholdStatus { threshold: Threshold::above(25.0) };
        let summary = service.query("svc", "errors", &kind, at(3)).await.unwrap();
        assert!(matches!(summary.value, SummaryValue::Threshold { status: ThresholdStatus::Fail, .. }));
    }

    #[tokio::test]
    async fn test_diagnose_uses_latest_visible_values() {
        let service = service_with(vec![
            MetricRecord::new("app", "hikaricp_connections_pending", 0.0, at(1)),
            MetricRecord::new("app", "hikaricp_connections_pending", 2.0, at(5)),
        ])
        .await;

        let early = service.diagnose("app", at(2)).await.unwrap();
        assert!(early.is_healthy());

        let late = service.diagnose("app", at(5)).await.unwrap();
        assert_eq!(late.diagnostics.len(), 1);
        assert_eq!(late.diagnostics[0].rule_id, "db-pool-exhausted");

        assert!(matches!(
            service.diagnose("missing", at(5)).await,
            Err(QueryError::SourceNotFound(_))
        ));
    }
}
