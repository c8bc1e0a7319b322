//! Diagnostic reports.

use std::fmt::Write as _;

use qualisentinel_core::{MetricRecord, Time};
use serde::{Deserialize, Serialize};

use crate::rollup::{rollup, KeyMetrics};
use crate::rules::{Diagnostic, SentinelProfile};

const HEALTHY_NOTE: &str = "No critical pattern was detected by the automatic heuristics. \
                            The system appears to operate within normal parameters.";

/// Key metrics and fired rules for one source at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// Analyzed source
    pub source_id: String,
    /// Evaluation instant
    pub as_of: Time,
    /// Rolled-up key metrics
    pub key_metrics: KeyMetrics,
    /// Fired rules, in rule order
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReport {
    /// Roll up `records` and evaluate the profile's rules.
    pub fn build<'a>(
        source_id: impl Into<String>,
        as_of: Time,
        profile: &SentinelProfile,
        records: impl IntoIterator<Item = &'a MetricRecord>,
    ) -> Self {
        let key_metrics = rollup(&profile.rollups, records);
        let diagnostics = profile.rules.evaluate(&key_metrics);
        Self {
            source_id: source_id.into(),
            as_of,
            key_metrics,
            diagnostics,
        }
    }

    /// Whether no rule fired.
    pub fn is_healthy(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Render as a Markdown block.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## QualiSentinel analysis: {}\n", self.source_id);
        let _ = writeln!(out, "_As of {}_\n", self.as_of.to_rfc3339());

        if self.key_metrics.is_empty() {
            out.push_str("No key metrics are available for this source.\n");
            return out;
        }

        out.push_str("**Key metrics:**\n");
        let m = &self.key_metrics;
        let _ = writeln!(
            out,
            "- System CPU usage: **{}**",
            fmt_opt(m.get("system_cpu_usage"), |v| format!("{:.2}%", v * 100.0))
        );
        let _ = writeln!(
            out,
            "- JVM memory used: **{}**",
            fmt_opt(m.get("jvm_memory_used_bytes"), |v| format!("{:.2} MB", v / 1024.0 / 1024.0))
        );
        let _ = writeln!(
            out,
            "- Total GC pause time: **{}**",
            fmt_opt(m.get("jvm_gc_pause_seconds_sum"), |v| format!("{:.4} s", v))
        );
        let _ = writeln!(
            out,
            "- Threads waiting for a DB connection: **{}**",
            fmt_opt(m.get("hikaricp_connections_pending"), |v| format!("{}", v as i64))
        );
        let _ = writeln!(
            out,
            "- Blocked threads: **{}**",
            fmt_opt(m.get("jvm_threads_states_blocked"), |v| format!("{}", v as i64))
        );

        let known = [
            "system_cpu_usage",
            "jvm_memory_used_bytes",
            "jvm_gc_pause_seconds_sum",
            "hikaricp_connections_pending",
            "jvm_threads_states_blocked",
        ];
        for (key, value) in m.iter().filter(|(k, _)| !known.contains(k)) {
            let _ = writeln!(out, "- {}: **{}**", key, value);
        }

        out.push_str("\n**Automatic diagnostics:**\n");
        if self.diagnostics.is_empty() {
            let _ = writeln!(out, "{}", HEALTHY_NOTE);
        } else {
            for d in &self.diagnostics {
                let _ = writeln!(
                    out,
                    "\n**[{}] {}** ({} = {}, limit {})\n{}",
                    d.severity.as_str(),
                    d.title,
                    d.metric,
                    d.observed,
                    d.limit,
                    d.detail
                );
            }
        }
        out
    }
}

fn fmt_opt(value: Option<f64>, f: impl Fn(f64) -> String) -> String {
    value.map(f).unwrap_or_else(|| "n/a".to_string())
}
