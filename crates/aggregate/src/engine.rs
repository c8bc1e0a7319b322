//! Aggregation engine - computes summaries over series.
//!
//! Only records with `timestamp <= as_of` are visible, and the engine never
//! reads the wall clock, so the same series, kind and instant always give the
//! same summary.

use qualisentinel_core::{
    MetricRecord, MetricSeries, SeriesKey, Summary, SummaryKind, SummaryValue, Time, TrendDirection,
};

use crate::error::{AggregateError, Result};

/// Slopes with a smaller magnitude are reported as flat.
const DEFAULT_FLAT_EPSILON: f64 = 1e-12;

/// Pure summary computation over series.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    flat_epsilon: f64,
}

impl AggregationEngine {
    /// Create an engine with the default flat-trend tolerance.
    pub fn new() -> Self {
        Self {
            flat_epsilon: DEFAULT_FLAT_EPSILON,
        }
    }

    /// Set the slope magnitude under which a trend counts as flat.
    pub fn with_flat_epsilon(mut self, epsilon: f64) -> Self {
        self.flat_epsilon = epsilon.abs();
        self
    }

    /// Summarize one series as of `as_of`.
    pub fn aggregate(&self, series: &MetricSeries, kind: &SummaryKind, as_of: Time) -> Result<Summary> {
        let visible: Vec<&MetricRecord> = series.visible_at(as_of).iter().map(|r| r.as_ref()).collect();
        self.summarize(vec![series.key().clone()], visible, kind, as_of)
    }

    /// Summarize a set of series as one merged sequence.
    ///
    /// Records sharing a timestamp keep the order of `series`, so for
    /// `latest` the record from the later series wins.
    pub fn aggregate_set(&self, series: &[&MetricSeries], kind: &SummaryKind, as_of: Time) -> Result<Summary> {
        let keys: Vec<SeriesKey> = series.iter().map(|s| s.key().clone()).collect();
        let mut visible: Vec<&MetricRecord> = series
            .iter()
            .flat_map(|s| s.visible_at(as_of).iter().map(|r| r.as_ref()))
            .collect();
        // Stable sort keeps input order among equal timestamps
        visible.sort_by_key(|r| r.timestamp());
        self.summarize(keys, visible, kind, as_of)
    }

    fn summarize(
        &self,
        series: Vec<SeriesKey>,
        visible: Vec<&MetricRecord>,
        kind: &SummaryKind,
        as_of: Time,
    ) -> Result<Summary> {
        validate(kind)?;

        let points: Vec<&MetricRecord> = match kind.window() {
            Some(window) => {
                let window = chrono::Duration::from_std(window)
                    .map_err(|_| AggregateError::InvalidRequest(format!("window {:?} is too large", window)))?;
                match as_of.checked_sub_signed(window) {
                    Some(start) => visible.into_iter().filter(|r| r.timestamp() > start).collect(),
                    None => visible,
                }
            }
            None => visible,
        };

        if points.len() < kind.min_records() {
            return Err(AggregateError::InsufficientData {
                kind: kind.name(),
                required: kind.min_records(),
                available: points.len(),
            });
        }

        let value = match kind {
            SummaryKind::Latest => {
                let last = last_of(&points, kind)?;
                SummaryValue::Latest {
                    timestamp: last.timestamp(),
                    value: last.value(),
                }
            }
            SummaryKind::MeanOverWindow { .. } => {
                let first = points[0];
                let last = last_of(&points, kind)?;
                SummaryValue::Mean {
                    mean: running_mean(&points),
                    from: first.timestamp(),
                    to: last.timestamp(),
                }
            }
            SummaryKind::Trend { .. } => {
                let slope = least_squares_slope(&points).ok_or_else(|| AggregateError::InsufficientData {
                    kind: kind.name(),
                    required: kind.min_records(),
                    available: distinct_timestamps(&points),
                })?;
                if !slope.is_finite() {
                    return Err(AggregateError::InvalidRequest(
                        "trend slope overflows for these values".to_string(),
                    ));
                }
                let direction = if slope.abs() <= self.flat_epsilon {
                    TrendDirection::Flat
                } else if slope > 0.0 {
                    TrendDirection::Increasing
                } else {
                    TrendDirection::Decreasing
                };
                SummaryValue::Trend {
                    slope_per_second: slope,
                    direction,
                }
            }
            SummaryKind::ThresholdStatus { threshold } => {
                let last = last_of(&points, kind)?;
                SummaryValue::Threshold {
                    status: threshold.evaluate(last.value()),
                    observed: last.value(),
                    limit: threshold.limit,
                    direction: threshold.direction,
                    timestamp: last.timestamp(),
                }
            }
        };

        tracing::debug!(kind = kind.name(), samples = points.len(), %as_of, "Computed summary");
        Ok(Summary {
            series,
            kind: kind.clone(),
            as_of,
            sample_count: points.len(),
            value,
        })
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(kind: &SummaryKind) -> Result<()> {
    if let Some(window) = kind.window() {
        if window.is_zero() {
            return Err(AggregateError::InvalidRequest("window must be longer than zero".to_string()));
        }
    }
    if let SummaryKind::ThresholdStatus { threshold } = kind {
        if !threshold.limit.is_finite() {
            return Err(AggregateError::InvalidRequest(format!(
                "threshold limit {} is not finite",
                threshold.limit
            )));
        }
    }
    Ok(())
}

fn last_of<'a>(points: &[&'a MetricRecord], kind: &SummaryKind) -> Result<&'a MetricRecord> {
    points.last().copied().ok_or(AggregateError::InsufficientData {
        kind: kind.name(),
        required: kind.min_records(),
        available: 0,
    })
}

fn distinct_timestamps(points: &[&MetricRecord]) -> usize {
    let mut stamps: Vec<Time> = points.iter().map(|r| r.timestamp()).collect();
    stamps.dedup();
    stamps.len()
}

/// Elapsed seconds from `from` to `to` at nanosecond resolution, falling back
/// to microseconds when the span overflows.
fn seconds_between(from: Time, to: Time) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => match delta.num_microseconds() {
            Some(micros) => micros as f64 / 1e6,
            None => delta.num_milliseconds() as f64 / 1e3,
        },
    }
}

/// Arithmetic mean that stays finite for finite inputs.
fn running_mean(points: &[&MetricRecord]) -> f64 {
    let mut mean = 0.0;
    for (i, r) in points.iter().enumerate() {
        let n = (i + 1) as f64;
        mean += r.value() / n - mean / n;
    }
    mean
}

/// Least-squares slope of value over time in seconds.
///
/// `None` when all points share one timestamp.
fn least_squares_slope(points: &[&MetricRecord]) -> Option<f64> {
    let origin = points.first()?.timestamp();
    let xs: Vec<f64> = points
        .iter()
        .map(|r| seconds_between(origin, r.timestamp()))
        .collect();
    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = running_mean(points);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, r) in xs.iter().zip(points) {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (r.value() - mean_y);
    }

    if sxx == 0.0 {
        return None;
    }
    Some(sxy / sxx)
}
