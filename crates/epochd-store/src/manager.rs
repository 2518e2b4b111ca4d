// ABOUTME: High-level storage manager for the epochd home directory layout.
// ABOUTME: Handles container directories, recovery at startup, checkpoints, and wiring logs into registries.

use std::fs;
use std::path::{Path, PathBuf};

use epochd_core::{RegistryState, SnapshotError, SnapshotManager};
use thiserror::Error;
use ulid::Ulid;

use crate::checkpoint::{RegistryCheckpoint, prune_checkpoints, save_checkpoint};
use crate::jsonl::{JsonlError, JsonlLog};
use crate::recovery::{CHECKPOINTS_DIR, EVENTS_FILE, RecoveryError, recover_container};

/// Errors that can occur during storage management operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("jsonl error: {0}")]
    Jsonl(#[from] JsonlError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] crate::checkpoint::CheckpointError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Manages the epochd home directory:
///
/// ```text
/// <home>/containers/<ulid>/events.jsonl
/// <home>/containers/<ulid>/checkpoints/state_<event_id>.json
/// ```
pub struct StorageManager {
    home: PathBuf,
}

impl StorageManager {
    /// Create a StorageManager rooted at `home`, creating the containers directory.
    pub fn new(home: PathBuf) -> Result<Self, ManagerError> {
        fs::create_dir_all(home.join("containers"))?;
        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path to a container's directory (does not create it).
    pub fn container_dir(&self, container: &Ulid) -> PathBuf {
        self.home.join("containers").join(container.to_string())
    }

    /// Create a container directory with its checkpoints subdirectory.
    pub fn create_container_dir(&self, container: &Ulid) -> Result<PathBuf, ManagerError> {
        let dir = self.container_dir(container);
        fs::create_dir_all(dir.join(CHECKPOINTS_DIR))?;
        Ok(dir)
    }

    /// Remove a container directory and everything in it. Missing directories are fine.
    pub fn remove_container_dir(&self, container: &Ulid) -> Result<(), ManagerError> {
        let dir = self.container_dir(container);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Scan the containers directory and return every container directory with its ULID.
    pub fn list_container_dirs(&self) -> Result<Vec<(Ulid, PathBuf)>, ManagerError> {
        let containers_dir = self.home.join("containers");
        if !containers_dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&containers_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            match name_str.parse::<Ulid>() {
                Ok(container) => results.push((container, path)),
                Err(_) => {
                    tracing::warn!("skipping non-ULID directory in containers/: {}", name_str);
                }
            }
        }

        results.sort_by_key(|(id, _)| *id);
        Ok(results)
    }

    /// Open a container's registry log for appending.
    pub fn open_log(&self, container: &Ulid) -> Result<JsonlLog, ManagerError> {
        Ok(JsonlLog::open(&self.container_dir(container).join(EVENTS_FILE))?)
    }

    /// Recover every container's registry. Containers that fail to recover are
    /// logged and skipped.
    pub fn recover_all(&self) -> Result<Vec<(Ulid, RegistryState)>, ManagerError> {
        let mut recovered = Vec::new();

        for (container, dir) in self.list_container_dirs()? {
            match recover_container(&dir) {
                Ok((state, last_event_id)) => {
                    tracing::info!(
                        "recovered container {} at event {} ({} held)",
                        container,
                        last_event_id,
                        state.len()
                    );
                    recovered.push((container, state));
                }
                Err(e) => {
                    tracing::error!("failed to recover container {}: {}", container, e);
                }
            }
        }

        Ok(recovered)
    }

    /// Recover every container and attach it to `snapshots` with its log as the
    /// event sink. Returns the ids attached.
    pub async fn load_into(&self, snapshots: &SnapshotManager) -> Result<Vec<Ulid>, ManagerError> {
        let mut attached = Vec::new();
        for (container, state) in self.recover_all()? {
            let log = self.open_log(&container)?;
            snapshots
                .attach(container, state, Some(Box::new(log)))
                .await?;
            attached.push(container);
        }
        Ok(attached)
    }

    /// Create a new container: make its directory, open its log, and attach an
    /// empty registry.
    pub async fn create_container(
        &self,
        snapshots: &SnapshotManager,
        container: Ulid,
    ) -> Result<(), ManagerError> {
        self.create_container_dir(&container)?;
        let log = self.open_log(&container)?;
        snapshots
            .attach(container, RegistryState::new(), Some(Box::new(log)))
            .await?;
        tracing::info!("created container {}", container);
        Ok(())
    }

    /// Destroy a container: tear down its registry, then delete its data.
    pub async fn destroy_container(
        &self,
        snapshots: &SnapshotManager,
        container: Ulid,
    ) -> Result<(), ManagerError> {
        snapshots.detach(container).await?;
        self.remove_container_dir(&container)?;
        tracing::info!("destroyed container {}", container);
        Ok(())
    }

    /// Write a checkpoint of `state` and keep only the newest `keep` checkpoints.
    pub fn write_checkpoint(
        &self,
        container: &Ulid,
        state: &RegistryState,
        keep: usize,
    ) -> Result<(), ManagerError> {
        let dir = self.container_dir(container).join(CHECKPOINTS_DIR);
        save_checkpoint(&dir, &RegistryCheckpoint::of(state))?;
        let pruned = prune_checkpoints(&dir, keep)?;
        tracing::debug!(
            "checkpointed container {} at event {} (pruned {})",
            container,
            state.last_event_id,
            pruned
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochd_core::{
        CounterAllocator, Epoch, EventSink, RegistryEvent, RegistryEventPayload, SinkError,
    };
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn snapshots() -> SnapshotManager {
        SnapshotManager::new(Arc::new(CounterAllocator::new()))
    }

    #[test]
    fn storage_manager_creates_directories() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("epochd_home");

        let mgr = StorageManager::new(home.clone()).unwrap();
        assert!(home.join("containers").exists());
        assert_eq!(mgr.home(), home.as_path());
    }

    #[test]
    fn lists_only_ulid_directories() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(dir.path().to_path_buf()).unwrap();

        let c = Ulid::new();
        let created = mgr.create_container_dir(&c).unwrap();
        assert!(created.join(CHECKPOINTS_DIR).exists());
        fs::create_dir_all(dir.path().join("containers").join("not-a-ulid")).unwrap();

        let listed = mgr.list_container_dirs().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, c);
    }

    #[tokio::test]
    async fn registry_survives_restart() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_path_buf();
        let c = Ulid::new();

        let kept = {
            let storage = StorageManager::new(home.clone()).unwrap();
            let snaps = snapshots();
            storage.create_container(&snaps, c).await.unwrap();
            let a = snaps.create(c).await.unwrap();
            let b = snaps.create(c).await.unwrap();
            let d = snaps.create(c).await.unwrap();
            snaps.destroy_one(c, a).await.unwrap();
            vec![b, d]
        };

        let storage = StorageManager::new(home).unwrap();
        let snaps = snapshots();
        let attached = storage.load_into(&snaps).await.unwrap();
        assert_eq!(attached, vec![c]);
        assert_eq!(snaps.list(c).await.unwrap(), kept);

        // Allocation resumes above the recovered high-water mark
        let next = snaps.create(c).await.unwrap();
        assert!(next > kept[1]);
    }

    #[tokio::test]
    async fn destroyed_epoch_is_never_reissued_after_restart() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_path_buf();
        let c = Ulid::new();

        let last = {
            let storage = StorageManager::new(home.clone()).unwrap();
            let snaps = snapshots();
            storage.create_container(&snaps, c).await.unwrap();
            let e = snaps.create(c).await.unwrap();
            snaps.destroy_one(c, e).await.unwrap();
            e
        };

        let storage = StorageManager::new(home).unwrap();
        let snaps = snapshots();
        storage.load_into(&snaps).await.unwrap();
        assert!(snaps.list(c).await.unwrap().is_empty());
        assert!(snaps.create(c).await.unwrap() > last);
    }

    #[tokio::test]
    async fn torn_fragment_between_creates_survives_restart() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_path_buf();
        let c = Ulid::new();

        let created = {
            let storage = StorageManager::new(home.clone()).unwrap();
            let snaps = snapshots();
            storage.create_container(&snaps, c).await.unwrap();
            let first = snaps.create(c).await.unwrap();

            let log_path = storage.container_dir(&c).join(EVENTS_FILE);
            let mut file = fs::OpenOptions::new().append(true).open(&log_path).unwrap();
            write!(file, r#"{{"event_id":3,"container_id":"#).unwrap();
            drop(file);

            let second = snaps.create(c).await.unwrap();
            vec![first, second]
        };

        let storage = StorageManager::new(home).unwrap();
        let snaps = snapshots();
        storage.load_into(&snaps).await.unwrap();
        assert_eq!(snaps.list(c).await.unwrap(), created);
    }

    /// Log wrapper that records reservations but rejects every snapshot event.
    struct RejectSnapshots(JsonlLog);

    impl EventSink for RejectSnapshots {
        fn append(&mut self, event: &RegistryEvent) -> Result<(), SinkError> {
            match event.payload {
                RegistryEventPayload::EpochsReserved { .. } => EventSink::append(&mut self.0, event),
                _ => Err("no space left on device".into()),
            }
        }
    }

    #[tokio::test]
    async fn epoch_from_failed_create_is_not_reissued_after_restart() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_path_buf();
        let c = Ulid::new();

        {
            let storage = StorageManager::new(home.clone()).unwrap();
            let snaps = snapshots();
            storage.create_container_dir(&c).unwrap();
            let log = storage.open_log(&c).unwrap();
            snaps
                .attach(c, RegistryState::new(), Some(Box::new(RejectSnapshots(log))))
                .await
                .unwrap();

            let err = snaps.create(c).await.unwrap_err();
            assert!(
                matches!(err, SnapshotError::CreateFailed { epoch, .. } if epoch == Epoch(1)),
                "expected CreateFailed at epoch 1, got: {}",
                err
            );
        }

        let storage = StorageManager::new(home).unwrap();
        let snaps = snapshots();
        storage.load_into(&snaps).await.unwrap();
        assert!(snaps.list(c).await.unwrap().is_empty());
        assert!(snaps.create(c).await.unwrap() > Epoch(1));
    }

    #[tokio::test]
    async fn checkpoint_then_recover() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_path_buf();
        let c = Ulid::new();

        {
            let storage = StorageManager::new(home.clone()).unwrap();
            let snaps = snapshots();
            storage.create_container(&snaps, c).await.unwrap();
            for _ in 0..4 {
                snaps.create(c).await.unwrap();
            }
            let state = snaps.handle(c).await.unwrap().read_state().await.clone();
            storage.write_checkpoint(&c, &state, 2).unwrap();
            snaps.destroy_range(c, Epoch(1), Epoch(2)).await.unwrap();
        }

        let storage = StorageManager::new(home).unwrap();
        let snaps = snapshots();
        storage.load_into(&snaps).await.unwrap();
        assert_eq!(snaps.list(c).await.unwrap(), vec![Epoch(3), Epoch(4)]);
    }

    #[tokio::test]
    async fn destroy_container_removes_registry_and_data() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::new(dir.path().to_path_buf()).unwrap();
        let snaps = snapshots();
        let c = Ulid::new();

        storage.create_container(&snaps, c).await.unwrap();
        snaps.create(c).await.unwrap();
        storage.destroy_container(&snaps, c).await.unwrap();

        assert!(!snaps.exists(c).await);
        assert!(!storage.container_dir(&c).exists());
        assert!(matches!(
            storage.destroy_container(&snaps, c).await,
            Err(ManagerError::Snapshot(SnapshotError::ContainerNotFound(_)))
        ));
    }
}
