//! Aggregation and sentinel analysis (QualiSentinel).
//!
//! Summaries over series, key-metric rollups and the rule set that turns
//! key metrics into diagnostics.

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod report;
pub mod rollup;
pub mod rules;

pub use engine::AggregationEngine;
pub use error::{AggregateError, Result};
pub use report::DiagnosticReport;
pub use rollup::{rollup, KeyMetrics, RollupOp, RollupRule};
pub use rules::{Diagnostic, RuleSet, SentinelProfile, SentinelRule, Severity};
