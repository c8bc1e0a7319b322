//! Summaries - derived statistics computed over series on demand.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::SeriesKey;
use crate::Time;

/// Which summary to compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryKind {
    /// Most recent visible record
    Latest,
    /// Arithmetic mean over a trailing window (`None` = whole series)
    MeanOverWindow {
        /// Trailing window length
        #[serde(default)]
        window: Option<Duration>,
    },
    /// Least-squares slope over a trailing window (`None` = whole series)
    Trend {
        /// Trailing window length
        #[serde(default)]
        window: Option<Duration>,
    },
    /// Pass/fail of the latest visible record against a threshold
    ThresholdStatus {
        /// Threshold to compare against
        threshold: Threshold,
    },
}

impl SummaryKind {
    /// Stable name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            SummaryKind::Latest => "latest",
            SummaryKind::MeanOverWindow { .. } => "mean_over_window",
            SummaryKind::Trend { .. } => "trend",
            SummaryKind::ThresholdStatus { .. } => "threshold_status",
        }
    }

    /// Minimum number of records the kind needs.
    pub fn min_records(&self) -> usize {
        match self {
            SummaryKind::Trend { .. } => 2,
            _ => 1,
        }
    }

    /// Trailing window, if the kind has one.
    pub fn window(&self) -> Option<Duration> {
        match self {
            SummaryKind::MeanOverWindow { window } | SummaryKind::Trend { window } => *window,
            _ => None,
        }
    }
}

impl std::fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of the limit is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    /// Fails when the value is strictly above the limit
    Above,
    /// Fails when the value is strictly below the limit
    Below,
}

impl ThresholdDirection {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdDirection::Above => "above",
            ThresholdDirection::Below => "below",
        }
    }
}

impl std::str::FromStr for ThresholdDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" | ">" | "max" => Ok(ThresholdDirection::Above),
            "below" | "<" | "min" => Ok(ThresholdDirection::Below),
            other => Err(format!("unknown threshold direction '{}'", other)),
        }
    }
}

/// A limit plus the direction in which crossing it fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Limit value
    pub limit: f64,
    /// Failing side
    pub direction: ThresholdDirection,
}

impl Threshold {
    /// Fail when the value exceeds `limit`.
    pub fn above(limit: f64) -> Self {
        Self {
            limit,
            direction: ThresholdDirection::Above,
        }
    }

    /// Fail when the value drops under `limit`.
    pub fn below(limit: f64) -> Self {
        Self {
            limit,
            direction: ThresholdDirection::Below,
        }
    }

    /// Compare a value against the threshold.
    pub fn evaluate(&self, value: f64) -> ThresholdStatus {
        let failed = match self.direction {
            ThresholdDirection::Above => value > self.limit,
            ThresholdDirection::Below => value < self.limit,
        };
        if failed {
            ThresholdStatus::Fail
        } else {
            ThresholdStatus::Pass
        }
    }
}

/// Result of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    /// Within limits
    Pass,
    /// Limit crossed
    Fail,
}

impl ThresholdStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdStatus::Pass => "pass",
            ThresholdStatus::Fail => "fail",
        }
    }
}

/// Direction of a trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Positive slope
    Increasing,
    /// Negative slope
    Decreasing,
    /// Slope indistinguishable from zero
    Flat,
}

impl TrendDirection {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Flat => "flat",
        }
    }
}

/// The computed value of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummaryValue {
    /// Most recent record
    Latest {
        /// When it was observed
        timestamp: Time,
        /// Observed value
        value: f64,
    },
    /// Mean over the records in `[from, to]`
    Mean {
        /// Arithmetic mean
        mean: f64,
        /// Timestamp of the first record used
        from: Time,
        /// Timestamp of the last record used
        to: Time,
    },
    /// Least-squares trend
    Trend {
        /// Change in value per second
        slope_per_second: f64,
        /// Classified direction
        direction: TrendDirection,
    },
    /// Threshold comparison of the latest record
    Threshold {
        /// Pass or fail
        status: ThresholdStatus,
        /// Compared value
        observed: f64,
        /// Threshold limit
        limit: f64,
        /// Failing side
        direction: ThresholdDirection,
        /// When the compared value was observed
        timestamp: Time,
    },
}

/// A derived statistic over one or more series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Series the summary covers
    pub series: Vec<SeriesKey>,
    /// Requested kind
    pub kind: SummaryKind,
    /// Evaluation instant
    pub as_of: Time,
    /// Number of records used
    pub sample_count: usize,
    /// Computed value
    pub value: SummaryValue,
}

impl Summary {
    /// Flatten into a field-name to value mapping for presentation layers.
    pub fn to_fields(&self) -> BTreeMap<String, JsonValue> {
        let mut fields = BTreeMap::new();
        fields.insert("kind".to_string(), JsonValue::from(self.kind.name()));
        fields.insert("as_of".to_string(), JsonValue::from(self.as_of.to_rfc3339()));
        fields.insert("sample_count".to_string(), JsonValue::from(self.sample_count));

        match self.series.as_slice() {
            [only] => {
                fields.insert("source_id".to_string(), JsonValue::from(only.source_id.clone()));
                fields.insert("metric_name".to_string(), JsonValue::from(only.metric_name.clone()));
            }
            many => {
                let keys: Vec<JsonValue> = many.iter().map(|k| JsonValue::from(k.to_string())).collect();
                fields.insert("series".to_string(), JsonValue::Array(keys));
            }
        }

        match &self.value {
            SummaryValue::Latest { timestamp, value } => {
                fields.insert("timestamp".to_string(), JsonValue::from(timestamp.to_rfc3339()));
                fields.insert("value".to_string(), JsonValue::from(*value));
            }
            SummaryValue::Mean { mean, from, to } => {
                fields.insert("mean".to_string(), JsonValue::from(*mean));
                fields.insert("from".to_string(), JsonValue::from(from.to_rfc3339()));
                fields.insert("to".to_string(), JsonValue::from(to.to_rfc3339()));
            }
            SummaryValue::Trend { slope_per_second, direction } => {
                fields.insert("slope_per_second".to_string(), JsonValue::from(*slope_per_second));
                fields.insert("direction".to_string(), JsonValue::from(direction.as_str()));
            }
            SummaryValue::Threshold { status, observed, limit, direction, timestamp } => {
                fields.insert("status".to_string(), JsonValue::from(status.as_str()));
                fields.insert("observed".to_string(), JsonValue::from(*observed));
                fields.insert("limit".to_string(), JsonValue::from(*limit));
                fields.insert("direction".to_string(), JsonValue::from(direction.as_str()));
                fields.insert("timestamp".to_string(), JsonValue::from(timestamp.to_rfc3339()));
            }
        }

        fields
    }
}

/// Error parsing a window duration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid duration '{0}': expected a number followed by s, m, h or d")]
pub struct DurationParseError(pub String);

/// Parse a duration such as `90s`, `5m`, `1h` or `2d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| DurationParseError(raw.to_string()))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(DurationParseError(raw.to_string())),
    };
    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| DurationParseError(raw.to_string()))
}
