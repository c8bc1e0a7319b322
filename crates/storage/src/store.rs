//! Concurrent in-memory series store.
//!
//! Every series is an append-only, snapshot-isolated log. Writers to the same
//! series are serialized by a per-series lock; each write builds the next
//! version of the series and publishes it with a single pointer swap, so a
//! reader sees the series either before or after an append, never halfway.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use qualisentinel_core::{AppendOutcome, MetricRecord, MetricSeries, SeriesKey, Snapshot, Time};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::retention::RetentionPolicy;
use crate::trait_::Result;

/// A published series together with the version it was read at.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    /// Immutable series content
    pub series: Arc<MetricSeries>,
    /// Series version; bumped on every change
    pub version: u64,
}

/// Counts from a batch append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendSummary {
    /// Records added
    pub appended: usize,
    /// Records identical to an existing one
    pub duplicates: usize,
    /// Records that superseded an existing one at the same timestamp
    pub replaced: usize,
    /// Records older than the retention horizon
    pub expired: usize,
    /// Records the series refused
    pub rejected: usize,
    /// Records dropped by the retention cap
    pub evicted: usize,
    /// Series whose content changed
    pub changed_series: Vec<SeriesKey>,
}

impl AppendSummary {
    fn absorb(&mut self, outcome: AppendOutcome) {
        match outcome {
            AppendOutcome::Appended => self.appended += 1,
            AppendOutcome::Duplicate => self.duplicates += 1,
            AppendOutcome::Replaced => self.replaced += 1,
            AppendOutcome::Expired => self.expired += 1,
        }
    }
}

struct SeriesSlot {
    writer: Mutex<()>,
    published: RwLock<Published>,
}

struct Published {
    series: Arc<MetricSeries>,
    version: u64,
}

impl SeriesSlot {
    fn new(key: SeriesKey) -> Self {
        Self {
            writer: Mutex::new(()),
            published: RwLock::new(Published {
                series: Arc::new(MetricSeries::new(key)),
                version: 0,
            }),
        }
    }

    async fn read(&self) -> SeriesSnapshot {
        let published = self.published.read().await;
        SeriesSnapshot {
            series: Arc::clone(&published.series),
            version: published.version,
        }
    }
}

/// In-memory store of all series, keyed by (source, metric).
pub struct SeriesStore {
    slots: RwLock<HashMap<SeriesKey, Arc<SeriesSlot>>>,
    retention: RetentionPolicy,
    floor: RwLock<Option<Time>>,
    version: AtomicU64,
}

impl SeriesStore {
    /// Create an empty store with unlimited retention.
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::unlimited())
    }

    /// Create an empty store with a retention policy.
    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            retention,
            floor: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Active retention policy.
    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Global version; bumped whenever any series changes.
    pub fn store_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    async fn slot(&self, key: &SeriesKey) -> Option<Arc<SeriesSlot>> {
        self.slots.read().await.get(key).cloned()
    }

    async fn slot_or_create(&self, key: &SeriesKey) -> Arc<SeriesSlot> {
        if let Some(slot) = self.slot(key).await {
            return slot;
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(SeriesSlot::new(key.clone()))),
        )
    }

    /// Drop horizon set by the last age-based retention pass.
    async fn floor(&self) -> Option<Time> {
        *self.floor.read().await
    }

    /// Whether retention would drop `record` from `series` straight away.
    ///
    /// Covers records older than the age horizon and, for a series already
    /// at its cap, records older than everything it holds.
    fn expired(&self, series: &MetricSeries, floor: Option<Time>, record: &MetricRecord) -> bool {
        let ts = record.timestamp();
        if floor.is_some_and(|floor| ts < floor) {
            return true;
        }
        match (self.retention.max_records_per_series, series.earliest()) {
            (Some(max), Some(earliest)) => series.len() >= max && ts < earliest.timestamp(),
            _ => false,
        }
    }

    /// Append one record to its series.
    ///
    /// The series is updated in place when no reader holds the published
    /// copy, so in-order appends stay cheap.
    pub async fn append(&self, record: MetricRecord) -> Result<AppendOutcome> {
        let key = record.key();
        let floor = self.floor().await;
        let slot = self.slot_or_create(&key).await;
        let _writer = slot.writer.lock().await;
        let mut published = slot.published.write().await;

        if self.expired(&published.series, floor, &record) {
            tracing::debug!(series = %key, "Dropped expired record");
            return Ok(AppendOutcome::Expired);
        }

        let series = Arc::make_mut(&mut published.series);
        let outcome = series.append(record)?;
        if outcome.changed() {
            self.retention.apply_cap(series);
            published.version += 1;
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        tracing::debug!(series = %key, ?outcome, "Appended record");
        Ok(outcome)
    }

    /// Append many records, grouping them per series so each series is
    /// published once. A series is only republished when its content
    /// after retention differs from what readers already see.
    pub async fn append_batch(&self, records: impl IntoIterator<Item = MetricRecord>) -> AppendSummary {
        let mut grouped: BTreeMap<SeriesKey, Vec<MetricRecord>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.key()).or_default().push(record);
        }

        let floor = self.floor().await;
        let mut summary = AppendSummary::default();
        for (key, records) in grouped {
            let slot = self.slot_or_create(&key).await;
            let _writer = slot.writer.lock().await;

            let current = slot.read().await.series;
            let mut next = MetricSeries::clone(&current);
            for record in records {
                if self.expired(&next, floor, &record) {
                    summary.absorb(AppendOutcome::Expired);
                    continue;
                }
                match next.append(record) {
                    Ok(outcome) => summary.absorb(outcome),
                    Err(e) => {
                        tracing::warn!(series = %key, "Rejected record: {}", e);
                        summary.rejected += 1;
                    }
                }
            }

            let evicted = self.retention.apply_cap(&mut next);
            if next.records() != current.records() {
                summary.evicted += evicted;
                self.publish(&slot, next).await;
                summary.changed_series.push(key);
            }
        }

        tracing::info!(
            appended = summary.appended,
            duplicates = summary.duplicates,
            replaced = summary.replaced,
            expired = summary.expired,
            rejected = summary.rejected,
            evicted = summary.evicted,
            "Applied batch"
        );
        summary
    }

    async fn publish(&self, slot: &SeriesSlot, series: MetricSeries) {
        let mut published = slot.published.write().await;
        published.series = Arc::new(series);
        published.version += 1;
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Consistent snapshot of one series.
    pub async fn snapshot(&self, key: &SeriesKey) -> Option<SeriesSnapshot> {
        let slot = self.slot(key).await?;
        let snapshot = slot.read().await;
        if snapshot.series.is_empty() {
            return None;
        }
        Some(snapshot)
    }

    /// Current version of one series.
    pub async fn version(&self, key: &SeriesKey) -> Option<u64> {
        self.snapshot(key).await.map(|s| s.version)
    }

    /// Keys of all series that hold records, sorted.
    pub async fn keys(&self) -> Vec<SeriesKey> {
        let slots: Vec<(SeriesKey, Arc<SeriesSlot>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();

        let mut keys = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if !slot.read().await.series.is_empty() {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Distinct source ids with at least one record.
    pub async fn sources(&self) -> BTreeSet<String> {
        self.keys().await.into_iter().map(|k| k.source_id).collect()
    }

    /// Metric names recorded for a source.
    pub async fn metrics_for(&self, source_id: &str) -> BTreeSet<String> {
        self.keys()
            .await
            .into_iter()
            .filter(|k| k.source_id == source_id)
            .map(|k| k.metric_name)
            .collect()
    }

    /// Snapshots of every series of a source.
    pub async fn series_for(&self, source_id: &str) -> Vec<Arc<MetricSeries>> {
        let mut out = Vec::new();
        for key in self.keys().await.into_iter().filter(|k| k.source_id == source_id) {
            if let Some(snapshot) = self.snapshot(&key).await {
                out.push(snapshot.series);
            }
        }
        out
    }

    /// Total records across all series.
    pub async fn record_count(&self) -> usize {
        let mut total = 0;
        for key in self.keys().await {
            if let Some(snapshot) = self.snapshot(&key).await {
                total += snapshot.series.len();
            }
        }
        total
    }

    /// Apply the full retention policy relative to `now`. Returns how many
    /// records were dropped.
    ///
    /// Later appends older than the age horizon are dropped as
    /// [`AppendOutcome::Expired`].
    pub async fn enforce_retention(&self, now: Time) -> usize {
        if let Some(cutoff) = self.retention.cutoff(now) {
            let mut floor = self.floor.write().await;
            *floor = Some(floor.map_or(cutoff, |f| f.max(cutoff)));
        }

        let slots: Vec<Arc<SeriesSlot>> = self.slots.read().await.values().cloned().collect();

        let mut removed = 0;
        for slot in slots {
            let _writer = slot.writer.lock().await;
            let mut next = MetricSeries::clone(&slot.read().await.series);
            let dropped = self.retention.apply(&mut next, now);
            if dropped > 0 {
                removed += dropped;
                self.publish(&slot, next).await;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Enforced retention");
        }
        removed
    }

    /// Copy every non-empty series into a snapshot.
    pub async fn to_snapshot(&self) -> Snapshot {
        let mut series = Vec::new();
        for key in self.keys().await {
            if let Some(snapshot) = self.snapshot(&key).await {
                series.push(MetricSeries::clone(&snapshot.series));
            }
        }
        Snapshot::new(series)
    }

    /// Load every record of a snapshot into the store.
    pub async fn restore(&self, snapshot: &Snapshot) -> AppendSummary {
        tracing::info!(snapshot = %snapshot.id, records = snapshot.record_count(), "Restoring snapshot");
        self.append_batch(snapshot.records().cloned()).await
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Time {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(source: &str, metric: &str, secs: i64, value: f64) -> MetricRecord {
        MetricRecord::new(source, metric, value, at(secs))
    }

    #[tokio::test]
    async fn test_append_and_snapshot() {
        let store = SeriesStore::new();
        let key = SeriesKey::new("svc", "cov");
        assert!(store.snapshot(&key).await.is_none());

        assert_eq!(store.append(record("svc", "cov", 1, 10.0)).await.unwrap(), AppendOutcome::Appended);
        let snap = store.snapshot(&key).await.unwrap();
        assert_eq!(snap.series.len(), 1);
        assert_eq!(snap.version, 1);
        assert_eq!(store.store_version(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_does_not_bump_version() {
        let store = SeriesStore::new();
        let key = SeriesKey::new("svc", "cov");
        store.append(record("svc", "cov", 1, 10.0)).await.unwrap();
        assert_eq!(store.append(record("svc", "cov", 1, 10.0)).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.version(&key).await, Some(1));
    }

    #[tokio::test]
    async fn test_rejected_record_leaves_store_untouched() {
        let store = SeriesStore::new();
        let err = store.append(record("svc", "cov", 1, f64::INFINITY)).await.unwrap_err();
        assert!(matches!(err, crate::StorageError::Rejected(_)));
        assert!(store.sources().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_groups_per_series() {
        let store = SeriesStore::new();
        let summary = store
            .append_batch(vec![
                record("a", "cov", 1, 1.0),
                record("a", "cov", 2, 2.0),
                record("b", "cov", 1, 3.0),
                record("a", "cov", 2, 2.0),
                record("a", "lint", 1, f64::NAN),
            ])
            .await;

        assert_eq!(summary.appended, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.changed_series.len(), 2);
        assert_eq!(store.version(&SeriesKey::new("a", "cov")).await, Some(1));
        assert_eq!(store.sources().await, BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(store.metrics_for("a").await, BTreeSet::from(["cov".to_string()]));
        assert_eq!(store.record_count().await, 3);
    }

    #[tokio::test]
    async fn test_reingesting_identical_batch_changes_nothing() {
        let store = SeriesStore::new();
        let batch = || vec![record("a", "cov", 1, 1.0), record("a", "cov", 2, 2.0)];
        store.append_batch(batch()).await;
        let version = store.store_version();

        let summary = store.append_batch(batch()).await;
        assert_eq!(summary.appended, 0);
        assert_eq!(summary.duplicates, 2);
        assert!(summary.changed_series.is_empty());
        assert_eq!(store.store_version(), version);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_retention_cap_on_append() {
        let store = SeriesStore::with_retention(RetentionPolicy::default().with_max_records(2));
        let summary = store
            .append_batch((1..=5).map(|i| record("a", "cov", i, i as f64)))
            .await;
        assert_eq!(summary.evicted, 3);
        let snap = store.snapshot(&SeriesKey::new("a", "cov")).await.unwrap();
        assert_eq!(snap.series.len(), 2);
        assert_eq!(snap.series.earliest().unwrap().value(), 4.0);
    }

    #[tokio::test]
    async fn test_enforce_retention_by_age() {
        let store = SeriesStore::with_retention(
            RetentionPolicy::default().with_max_age(std::time::Duration::from_secs(10)),
        );
        store.append_batch((0..5).map(|i| record("a", "cov", i * 10, i as f64))).await;

        let removed = store.enforce_retention(at(40)).await;
        assert_eq!(removed, 3);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_reingest_under_record_cap_changes_nothing() {
        let store = SeriesStore::with_retention(RetentionPolicy::default().with_max_records(2));
        let key = SeriesKey::new("a", "cov");
        let batch = || (1..=5).map(|i| record("a", "cov", i, i as f64));
        store.append_batch(batch()).await;
        let version = store.version(&key).await;

        let summary = store.append_batch(batch()).await;
        assert_eq!(summary.appended, 0);
        assert_eq!(summary.expired, 3);
        assert_eq!(summary.duplicates, 2);
        assert!(summary.changed_series.is_empty());
        assert_eq!(store.version(&key).await, version);

        assert_eq!(store.append(record("a", "cov", 1, 1.0)).await.unwrap(), AppendOutcome::Expired);
        assert_eq!(store.version(&key).await, version);
    }

    #[tokio::test]
    async fn test_reingest_after_age_retention_stays_evicted() {
        let store = SeriesStore::with_retention(
            RetentionPolicy::default().with_max_age(std::time::Duration::from_secs(2)),
        );
        let key = SeriesKey::new("a", "cov");
        let batch = || (1..=5).map(|i| record("a", "cov", i, i as f64));
        store.append_batch(batch()).await;
        assert_eq!(store.enforce_retention(at(5)).await, 2);
        let version = store.version(&key).await;

        let summary = store.append_batch(batch()).await;
        assert_eq!(summary.expired, 2);
        assert_eq!(summary.duplicates, 3);
        assert!(summary.changed_series.is_empty());
        assert_eq!(store.version(&key).await, version);

        let snap = store.snapshot(&key).await.unwrap();
        let values: Vec<f64> = snap.series.iter().map(|r| r.value()).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);

        // The horizon applies to series created later too
        assert_eq!(store.append(record("b", "cov", 1, 1.0)).await.unwrap(), AppendOutcome::Expired);
        assert!(store.snapshot(&SeriesKey::new("b", "cov")).await.is_none());
    }

    #[tokio::test]
    async fn test_series_emptied_by_retention_is_gone() {
        let store = SeriesStore::with_retention(
            RetentionPolicy::default().with_max_age(std::time::Duration::from_secs(1)),
        );
        let key = SeriesKey::new("a", "cov");
        store.append(record("a", "cov", 1, 1.0)).await.unwrap();
        store.enforce_retention(at(100)).await;

        assert!(store.snapshot(&key).await.is_none());
        assert!(store.version(&key).await.is_none());
        assert!(store.sources().await.is_empty());
    }

    #[tokio::test]
    async fn test_append_keeps_held_snapshots_intact() {
        let store = SeriesStore::new();
        let key = SeriesKey::new("a", "cov");
        store.append(record("a", "cov", 1, 1.0)).await.unwrap();
        let held = store.snapshot(&key).await.unwrap();

        store.append(record("a", "cov", 2, 2.0)).await.unwrap();
        store.append(record("a", "cov", 3, 3.0)).await.unwrap();
        assert_eq!(held.series.len(), 1);
        assert_eq!(held.version, 1);

        let now = store.snapshot(&key).await.unwrap();
        assert_eq!(now.series.len(), 3);
        assert_eq!(now.version, 3);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_into_new_store() {
        let store = SeriesStore::new();
        store
            .append_batch(vec![record("a", "cov", 1, 1.0), record("b", "lint", 2, 5.0)])
            .await;
        let snapshot = store.to_snapshot().await;
        assert_eq!(snapshot.series.len(), 2);

        let restored = SeriesStore::new();
        let summary = restored.restore(&snapshot).await;
        assert_eq!(summary.appended, 2);
        assert_eq!(restored.keys().await, store.keys().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_partial_series() {
        let store = Arc::new(SeriesStore::new());
        let key = SeriesKey::new("svc", "latency");

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..200 {
                    store.append(record("svc", "latency", i, i as f64)).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let key = key.clone();
            readers.push(tokio::spawn(async move {
                let mut last_len = 0;
                for _ in 0..200 {
                    if let Some(snap) = store.snapshot(&key).await {
                        assert!(snap.series.len() >= last_len);
                        assert_eq!(snap.series.len() as u64, snap.version);
                        for (i, r) in snap.series.iter().enumerate() {
                            assert_eq!(r.value(), i as f64);
                        }
                        last_len = snap.series.len();
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(store.snapshot(&key).await.unwrap().series.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_same_series_keep_unique_timestamps() {
        let store = Arc::new(SeriesStore::new());
        let mut writers = Vec::new();
        for w in 0..4i64 {
            let store = Arc::clone(&store);
            writers.push(tokio::spawn(async move {
                for i in 0..50i64 {
                    // Writers overlap on every other timestamp
                    let ts = if i % 2 == 0 { i } else { 1000 + w * 100 + i };
                    store.append(record("svc", "cov", ts, 1.0)).await.unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        let snap = store.snapshot(&SeriesKey::new("svc", "cov")).await.unwrap();
        let stamps: Vec<_> = snap.series.iter().map(|r| r.timestamp()).collect();
        let mut deduped = stamps.clone();
        deduped.dedup();
        assert_eq!(stamps, deduped);
        assert_eq!(snap.series.len(), 25 + 4 * 25);
    }
}
