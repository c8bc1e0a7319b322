//! Retention policy for series records.

use std::time::Duration;

use qualisentinel_core::{MetricSeries, Time};
use serde::{Deserialize, Serialize};

/// Bounds on how many records a series keeps. Unlimited by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Drop records older than this, relative to the enforcement instant
    #[serde(default)]
    pub max_age: Option<Duration>,

    /// Keep at most this many records per series (newest win)
    #[serde(default)]
    pub max_records_per_series: Option<usize>,
}

impl RetentionPolicy {
    /// Keep everything.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Set the maximum age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Set the per-series record cap.
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records_per_series = Some(max);
        self
    }

    /// Apply the record cap. Returns how many records were removed.
    pub fn apply_cap(&self, series: &mut MetricSeries) -> usize {
        match self.max_records_per_series {
            Some(max) => series.truncate_oldest(max),
            None => 0,
        }
    }

    /// Oldest timestamp the age limit keeps, relative to `now`.
    pub fn cutoff(&self, now: Time) -> Option<Time> {
        // Ages beyond chrono's range mean nothing is old enough to drop
        let age = chrono::Duration::from_std(self.max_age?).ok()?;
        now.checked_sub_signed(age)
    }

    /// Apply both the age limit (relative to `now`) and the record cap.
    pub fn apply(&self, series: &mut MetricSeries, now: Time) -> usize {
        let mut removed = 0;
        if let Some(cutoff) = self.cutoff(now) {
            removed += series.evict_before(cutoff);
        }
        removed + self.apply_cap(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qualisentinel_core::{MetricRecord, SeriesKey};

    fn series() -> MetricSeries {
        MetricSeries::from_records(
            SeriesKey::new("svc", "cov"),
            (0..10).map(|i| MetricRecord::new("svc", "cov", i as f64, Utc.timestamp_opt(i * 60, 0).unwrap())),
        )
        .unwrap()
    }

    #[test]
    fn test_unlimited_keeps_everything() {
        let mut s = series();
        assert_eq!(RetentionPolicy::unlimited().apply(&mut s, Utc::now()), 0);
        assert_eq!(s.len(), 10);
    }

    #[test]
    fn test_max_age() {
        let mut s = series();
        let now = Utc.timestamp_opt(9 * 60, 0).unwrap();
        let policy = RetentionPolicy::default().with_max_age(Duration::from_secs(180));
        assert_eq!(policy.apply(&mut s, now), 6);
        assert_eq!(s.earliest().unwrap().value(), 6.0);
    }

    #[test]
    fn test_max_records() {
        let mut s = series();
        let policy = RetentionPolicy::default().with_max_records(4);
        assert_eq!(policy.apply_cap(&mut s), 6);
        assert_eq!(s.len(), 4);
        assert_eq!(s.latest().unwrap().value(), 9.0);
    }
}
