//! Snapshot storage trait abstraction.

use async_trait::async_trait;
use qualisentinel_core::{Snapshot, SnapshotId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record rejected by its series
    #[error("Rejected record: {0}")]
    Rejected(#[from] qualisentinel_core::SeriesError),
}

/// Persistence for store snapshots.
///
/// This trait allows different storage backends to be plugged in.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Persist a snapshot.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Load a snapshot by ID.
    async fn load_snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>>;

    /// List the IDs of all persisted snapshots, oldest first.
    async fn list_snapshots(&self) -> Result<Vec<SnapshotId>>;

    /// Load the most recent snapshot.
    async fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        match self.list_snapshots().await?.last() {
            Some(id) => self.load_snapshot(*id).await,
            None => Ok(None),
        }
    }

    /// Delete all but the newest `keep` snapshots. Returns how many were removed.
    async fn prune_snapshots(&self, keep: usize) -> Result<usize>;
}
