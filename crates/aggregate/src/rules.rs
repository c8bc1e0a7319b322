//! Sentinel rules - threshold heuristics over key metrics.

use qualisentinel_core::{Threshold, ThresholdStatus};
use serde::{Deserialize, Serialize};

use crate::rollup::{KeyMetrics, RollupRule};

/// Severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// A heuristic that fires when a key metric crosses a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelRule {
    /// Unique identifier
    pub id: String,
    /// Key metric the rule reads
    pub metric: String,
    /// Firing condition (a `Fail` status fires)
    pub threshold: Threshold,
    /// Severity of the finding
    pub severity: Severity,
    /// Short headline
    pub title: String,
    /// Explanation and suggested remediation
    pub detail: String,
}

impl SentinelRule {
    /// Evaluate against key metrics. Missing metrics never fire.
    pub fn evaluate(&self, metrics: &KeyMetrics) -> Option<Diagnostic> {
        let observed = metrics.get(&self.metric)?;
        match self.threshold.evaluate(observed) {
            ThresholdStatus::Pass => None,
            ThresholdStatus::Fail => Some(Diagnostic {
                rule_id: self.id.clone(),
                severity: self.severity,
                title: self.title.clone(),
                detail: self.detail.clone(),
                metric: self.metric.clone(),
                observed,
                limit: self.threshold.limit,
            }),
        }
    }
}

/// A fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Rule that fired
    pub rule_id: String,
    /// Severity of the finding
    pub severity: Severity,
    /// Short headline
    pub title: String,
    /// Explanation and suggested remediation
    pub detail: String,
    /// Key metric the rule read
    pub metric: String,
    /// Observed key metric value
    pub observed: f64,
    /// Threshold limit that was crossed
    pub limit: f64,
}

/// Ordered collection of sentinel rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<SentinelRule>,
}

impl RuleSet {
    /// Create a rule set.
    pub fn new(rules: Vec<SentinelRule>) -> Self {
        Self { rules }
    }

    /// Heuristics for JVM services exposing Micrometer metrics.
    pub fn jvm_defaults() -> Self {
        Self::new(vec![
            SentinelRule {
                id: "gc-pressure".to_string(),
                metric: "jvm_gc_pause_seconds_sum".to_string(),
                threshold: Threshold::above(1.0),
                severity: Severity::Warning,
                title: "Memory pressure".to_string(),
                detail: "The application spends too long in garbage collection pauses, a strong sign of \
                         wasteful allocation or a memory leak. Look for heavy objects built inside loops \
                         and static collections that grow without bound."
                    .to_string(),
            },
            SentinelRule {
                id: "db-pool-exhausted".to_string(),
                metric: "hikaricp_connections_pending".to_string(),
                threshold: Threshold::above(0.0),
                severity: Severity::Critical,
                title: "Database connection pool exhausted".to_string(),
                detail: "Requests are waiting for a database connection. Keep transactional scopes as \
                         small as possible and look for N+1 query patterns."
                    .to_string(),
            },
            SentinelRule {
                id: "thread-contention".to_string(),
                metric: "jvm_threads_states_blocked".to_string(),
                threshold: Threshold::above(5.0),
                severity: Severity::Error,
                title: "Thread contention".to_string(),
                detail: "Many threads are blocked on shared locks. Review synchronized sections and \
                         explicit locks, and prefer concurrent collections."
                    .to_string(),
            },
        ])
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[SentinelRule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule, keeping rule order.
    pub fn evaluate(&self, metrics: &KeyMetrics) -> Vec<Diagnostic> {
        let fired: Vec<Diagnostic> = self.rules.iter().filter_map(|r| r.evaluate(metrics)).collect();
        for diagnostic in &fired {
            tracing::info!(
                rule = %diagnostic.rule_id,
                observed = diagnostic.observed,
                limit = diagnostic.limit,
                "Sentinel rule fired"
            );
        }
        fired
    }
}

/// Rollup rules plus the sentinel rules applied to their output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelProfile {
    /// Key-metric rollup rules
    #[serde(default = "RollupRule::jvm_defaults")]
    pub rollups: Vec<RollupRule>,
    /// Sentinel rules over the key metrics
    #[serde(default = "RuleSet::jvm_defaults")]
    pub rules: RuleSet,
}

impl SentinelProfile {
    /// Profile for JVM services exposing Micrometer metrics.
    pub fn jvm() -> Self {
        Self {
            rollups: RollupRule::jvm_defaults(),
            rules: RuleSet::jvm_defaults(),
        }
    }
}

impl Default for SentinelProfile {
    fn default() -> Self {
        Self::jvm()
    }
}
