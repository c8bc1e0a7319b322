//! JSON file snapshot storage.
//!
//! Stores each snapshot as `snapshots/<id>.json` under a data directory and
//! keeps a small meta marker per snapshot (record count + written_at).

use std::path::{Path, PathBuf};

use qualisentinel_core::{Snapshot, SnapshotId};
use tokio::fs;

use super::{Result, SnapshotStorage};

/// File-based JSON snapshot storage backend.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStorage {
    root: PathBuf,
}

impl JsonSnapshotStorage {
    /// Create storage under `root`, creating the `snapshots/` and
    /// `meta/snapshots/` subdirectories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("snapshots")).await?;
        fs::create_dir_all(root.join("meta").join("snapshots")).await?;

        Ok(Self { root })
    }

    /// Data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, id: SnapshotId) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", id))
    }

    fn meta_path(&self, id: SnapshotId) -> PathBuf {
        self.root
            .join("meta")
            .join("snapshots")
            .join(format!("{}.meta.json", id))
    }
}

#[async_trait::async_trait]
impl SnapshotStorage for JsonSnapshotStorage {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.snapshot_path(snapshot.id);
        let json = serde_json::to_string_pretty(snapshot)?;

        // Write then rename so readers never see a half-written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;

        let meta = serde_json::json!({
            "records": snapshot.record_count(),
            "series": snapshot.series.len(),
            "written_at": chrono::Utc::now(),
        });
        fs::write(self.meta_path(snapshot.id), serde_json::to_string_pretty(&meta)?.as_bytes()).await?;

        tracing::info!(
            snapshot = %snapshot.id,
            series = snapshot.series.len(),
            records = snapshot.record_count(),
            "Saved snapshot"
        );
        Ok(())
    }

    async fn load_snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>> {
        read_json(&self.snapshot_path(id)).await
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotId>> {
        let mut ids = Vec::new();
        let mut rd = fs::read_dir(self.root.join("snapshots")).await?;
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<SnapshotId>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!(path = %path.display(), "Ignoring unrecognised snapshot file"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn prune_snapshots(&self, keep: usize) -> Result<usize> {
        let ids = self.list_snapshots().await?;
        let excess = ids.len().saturating_sub(keep);
        for id in &ids[..excess] {
            remove_if_exists(&self.snapshot_path(*id)).await?;
            remove_if_exists(&self.meta_path(*id)).await?;
        }
        if excess > 0 {
            tracing::debug!(removed = excess, kept = keep, "Pruned snapshots");
        }
        Ok(excess)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
    })?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qualisentinel_core::{MetricRecord, MetricSeries, SeriesKey};

    fn snapshot(value: f64) -> Snapshot {
        let series = MetricSeries::from_records(
            SeriesKey::new("svc", "cov"),
            vec![MetricRecord::new("svc", "cov", value, Utc.timestamp_opt(1, 0).unwrap())],
        )
        .unwrap();
        Snapshot::new(vec![series])
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSnapshotStorage::new(dir.path()).await.unwrap();

        let snap = snapshot(42.0);
        storage.save_snapshot(&snap).await.unwrap();

        let loaded = storage.load_snapshot(snap.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, snap.id);
        assert_eq!(loaded.series[0].latest().unwrap().value(), 42.0);
        assert!(dir.path().join("meta/snapshots").join(format!("{}.meta.json", snap.id)).exists());
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSnapshotStorage::new(dir.path()).await.unwrap();
        assert!(storage.load_snapshot(SnapshotId::new()).await.unwrap().is_none());
        assert!(storage.latest_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSnapshotStorage::new(dir.path()).await.unwrap();

        let mut ids = Vec::new();
        for value in [1.0, 2.0, 3.0] {
            let snap = snapshot(value);
            ids.push(snap.id);
            storage.save_snapshot(&snap).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let latest = storage.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.id, ids[2]);

        assert_eq!(storage.prune_snapshots(1).await.unwrap(), 2);
        assert_eq!(storage.list_snapshots().await.unwrap(), vec![ids[2]]);
        assert_eq!(storage.prune_snapshots(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonSnapshotStorage::new(dir.path()).await.unwrap();
        fs::write(dir.path().join("snapshots/notes.txt"), b"x").await.unwrap();
        fs::write(dir.path().join("snapshots/not-an-id.json"), b"{}").await.unwrap();
        assert!(storage.list_snapshots().await.unwrap().is_empty());
    }
}
