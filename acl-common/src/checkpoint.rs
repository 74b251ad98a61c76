use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Errors surfaced by a checkpoint store.
///
/// `StaleCommit` is not a transient failure: two writers racing on the same
/// partition means the upstream lease coordination is broken, and the caller
/// is expected to fault the partition rather than continue.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("stale commit for partition {partition_id}: stored {stored}, attempted {attempted}")]
    StaleCommit {
        partition_id: String,
        stored: i64,
        attempted: i64,
    },
}

impl StoreError {
    /// Whether retrying the same commit after redelivery could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::StaleCommit { .. })
    }
}

/// The last sequence position known to be fully processed for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub partition_id: String,
    pub position: i64,
}

/// Durable partition → last-committed-position mapping.
///
/// `commit` returning `Ok` is a promise that the position survives a process
/// crash. Positions are monotonic per partition; a commit below the stored
/// position is rejected with `StaleCommit`. Commits to different partitions
/// may run concurrently without coordination.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, partition_id: &str) -> Result<Option<i64>, StoreError>;
    async fn commit(&self, partition_id: &str, position: i64) -> Result<(), StoreError>;
}

/// Checkpoint store keeping one JSON record per partition inside a container
/// directory, mirroring the record-per-partition layout of the blob container
/// used by the reference deployment.
///
/// Commits write to a scratch file and rename into place, so a crash mid-write
/// leaves the previous record intact.
pub struct BlobCheckpointStore {
    container: PathBuf,
}

impl BlobCheckpointStore {
    /// Opens the container directory, creating it if absent.
    pub fn open(container: impl AsRef<Path>) -> Result<Self, StoreError> {
        let container = container.as_ref().to_path_buf();
        if !container.exists() {
            std::fs::create_dir_all(&container)?;
            info!("created checkpoint container at {}", container.display());
        }
        Ok(Self { container })
    }

    fn record_path(&self, partition_id: &str) -> PathBuf {
        self.container.join(format!("{partition_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for BlobCheckpointStore {
    async fn load(&self, partition_id: &str) -> Result<Option<i64>, StoreError> {
        let path = self.record_path(partition_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: Checkpoint = serde_json::from_slice(&bytes)?;
        Ok(Some(record.position))
    }

    async fn commit(&self, partition_id: &str, position: i64) -> Result<(), StoreError> {
        if let Some(stored) = self.load(partition_id).await? {
            if position < stored {
                return Err(StoreError::StaleCommit {
                    partition_id: partition_id.to_owned(),
                    stored,
                    attempted: position,
                });
            }
        }

        let record = Checkpoint {
            partition_id: partition_id.to_owned(),
            position,
        };
        let bytes = serde_json::to_vec(&record)?;

        let path = self.record_path(partition_id);
        let scratch = self.container.join(format!("{partition_id}.json.tmp"));
        let mut file = tokio::fs::File::create(&scratch).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&scratch, &path).await?;
        Ok(())
    }
}

/// In-process checkpoint store for tests and local runs. Enforces the same
/// monotonicity rule as the durable store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    positions: RwLock<HashMap<String, i64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, partition_id: &str) -> Result<Option<i64>, StoreError> {
        let positions = self.positions.read().expect("checkpoint map poisoned");
        Ok(positions.get(partition_id).copied())
    }

    async fn commit(&self, partition_id: &str, position: i64) -> Result<(), StoreError> {
        let mut positions = self.positions.write().expect("checkpoint map poisoned");
        if let Some(&stored) = positions.get(partition_id) {
            if position < stored {
                return Err(StoreError::StaleCommit {
                    partition_id: partition_id.to_owned(),
                    stored,
                    attempted: position,
                });
            }
        }
        positions.insert(partition_id.to_owned(), position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_loads_what_it_committed() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load("0").await.unwrap(), None);

        store.commit("0", 41).await.unwrap();
        assert_eq!(store.load("0").await.unwrap(), Some(41));

        // Re-committing the same position is allowed (redelivery after a
        // crash between dispatch and commit).
        store.commit("0", 41).await.unwrap();
        store.commit("0", 42).await.unwrap();
        assert_eq!(store.load("0").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_regression() {
        let store = MemoryCheckpointStore::new();
        store.commit("3", 10).await.unwrap();

        let err = store.commit("3", 9).await.unwrap_err();
        match err {
            StoreError::StaleCommit {
                partition_id,
                stored,
                attempted,
            } => {
                assert_eq!(partition_id, "3");
                assert_eq!(stored, 10);
                assert_eq!(attempted, 9);
            }
            other => panic!("expected StaleCommit, got {other:?}"),
        }
        assert!(!store.commit("3", 9).await.unwrap_err().is_transient());
        assert_eq!(store.load("3").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_memory_store_partitions_are_independent() {
        let store = MemoryCheckpointStore::new();
        store.commit("0", 100).await.unwrap();
        store.commit("1", 5).await.unwrap();

        assert_eq!(store.load("0").await.unwrap(), Some(100));
        assert_eq!(store.load("1").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_blob_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("checkpoints");

        let store = BlobCheckpointStore::open(&container).unwrap();
        assert_eq!(store.load("0").await.unwrap(), None);
        store.commit("0", 7).await.unwrap();
        drop(store);

        // A new store over the same container sees the committed position.
        let store = BlobCheckpointStore::open(&container).unwrap();
        assert_eq!(store.load("0").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_blob_store_rejects_regression() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobCheckpointStore::open(dir.path()).unwrap();

        store.commit("7", 21).await.unwrap();
        let err = store.commit("7", 20).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleCommit { .. }));
        assert_eq!(store.load("7").await.unwrap(), Some(21));
    }
}
