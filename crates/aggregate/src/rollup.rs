//! Key-metric rollup.
//!
//! Collapses many raw samples (one per label combination) into a handful of
//! named key metrics such as total heap usage or blocked thread count.

use std::collections::BTreeMap;

use qualisentinel_core::{MetricRecord, Time};
use serde::{Deserialize, Serialize};

/// Metadata key holding the bare metric name of a labelled sample.
const NAME_LABEL: &str = "__name__";

/// How matching values are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupOp {
    /// Sum of all matches
    Sum,
    /// Largest match
    Max,
    /// Smallest match
    Min,
    /// Most recent match
    Last,
}

impl RollupOp {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupOp::Sum => "sum",
            RollupOp::Max => "max",
            RollupOp::Min => "min",
            RollupOp::Last => "last",
        }
    }
}

/// Maps matching records onto one key metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRule {
    /// Name of the produced key metric
    pub key: String,
    /// Substring the bare metric name must contain
    pub pattern: String,
    /// Combination applied to the matches
    pub op: RollupOp,
    /// Labels the record must carry with exactly these values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl RollupRule {
    /// Create a rule without label filters.
    pub fn new(key: impl Into<String>, pattern: impl Into<String>, op: RollupOp) -> Self {
        Self {
            key: key.into(),
            pattern: pattern.into(),
            op,
            labels: BTreeMap::new(),
        }
    }

    /// Require a label value.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Check whether a record feeds this rule.
    pub fn matches(&self, record: &MetricRecord) -> bool {
        let name = record
            .metadata()
            .get(NAME_LABEL)
            .map(String::as_str)
            .unwrap_or_else(|| record.metric_name());
        name.contains(&self.pattern)
            && self
                .labels
                .iter()
                .all(|(k, v)| record.metadata().get(k) == Some(v))
    }

    /// The rules behind the JVM dashboard's key metrics.
    pub fn jvm_defaults() -> Vec<RollupRule> {
        vec![
            RollupRule::new("jvm_memory_used_bytes", "jvm_memory_used_bytes", RollupOp::Sum),
            RollupRule::new("system_cpu_usage", "system_cpu_usage", RollupOp::Last),
            RollupRule::new(
                "http_server_requests_seconds_count",
                "http_server_requests_seconds_count",
                RollupOp::Sum,
            ),
            RollupRule::new(
                "http_server_requests_seconds_max",
                "http_server_requests_seconds_max",
                RollupOp::Max,
            ),
            RollupRule::new("jvm_gc_pause_seconds_sum", "jvm_gc_pause_seconds_sum", RollupOp::Sum),
            RollupRule::new(
                "hikaricp_connections_pending",
                "hikaricp_connections_pending",
                RollupOp::Sum,
            ),
            RollupRule::new("jvm_threads_states_blocked", "jvm_threads_states", RollupOp::Sum)
                .with_label("state", "blocked"),
        ]
    }
}

/// Named key metrics. A key is absent when no record matched its rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMetrics(BTreeMap<String, f64>);

impl KeyMetrics {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a key metric.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Set a key metric.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// Number of key metrics present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no key metric is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Apply rollup rules to a batch of records.
///
/// For [`RollupOp::Last`] ties on timestamp go to the record seen later.
pub fn rollup<'a>(rules: &[RollupRule], records: impl IntoIterator<Item = &'a MetricRecord>) -> KeyMetrics {
    let records: Vec<&MetricRecord> = records.into_iter().collect();
    let mut metrics = KeyMetrics::new();

    for rule in rules {
        let mut acc: Option<(f64, Time)> = None;
        for record in records.iter().filter(|r| rule.matches(r)) {
            let (value, ts) = (record.value(), record.timestamp());
            acc = Some(match (acc, rule.op) {
                (None, _) => (value, ts),
                (Some((a, t)), RollupOp::Sum) => (a + value, t.max(ts)),
                (Some((a, t)), RollupOp::Max) => (a.max(value), t.max(ts)),
                (Some((a, t)), RollupOp::Min) => (a.min(value), t.max(ts)),
                (Some((a, t)), RollupOp::Last) => {
                    if ts >= t {
                        (value, ts)
                    } else {
                        (a, t)
                    }
                }
            });
        }
        if let Some((value, _)) = acc {
            metrics.insert(rule.key.clone(), value);
        }
    }

    tracing::debug!(rules = rules.len(), keys = metrics.len(), "Rolled up key metrics");
    metrics
}
