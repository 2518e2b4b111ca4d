// ABOUTME: Background task that checkpoints a container's registry as its event log grows.
// ABOUTME: Subscribes to the registry broadcast and writes a checkpoint every N events or after lag.

use std::sync::Arc;

use epochd_core::RegistryHandle;
use epochd_store::StorageManager;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Spawn a task that writes a registry checkpoint once `every` events have been
/// applied since the last one, keeping the newest `kept` checkpoints on disk.
///
/// Events are already durable in the registry log before they are broadcast,
/// so a lagged receiver loses nothing; it just checkpoints immediately.
pub fn spawn_checkpointer(
    handle: RegistryHandle,
    storage: Arc<StorageManager>,
    every: u64,
    kept: usize,
) -> JoinHandle<()> {
    let mut rx = handle.subscribe();
    let container = handle.container_id;

    tokio::spawn(async move {
        let mut checkpointed_at = handle.read_state().await.last_event_id;

        loop {
            let force = match rx.recv().await {
                Ok(event) => {
                    if event.event_id.saturating_sub(checkpointed_at) < every {
                        continue;
                    }
                    false
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(
                        "checkpointer for container {} lagged by {} events",
                        container,
                        n
                    );
                    true
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("registry for container {} closed", container);
                    break;
                }
            };

            let state = handle.read_state().await.clone();
            if !force && state.last_event_id == checkpointed_at {
                continue;
            }
            match storage.write_checkpoint(&container, &state, kept) {
                Ok(()) => checkpointed_at = state.last_event_id,
                Err(e) => tracing::error!(
                    "failed to checkpoint container {}: {}",
                    container,
                    e
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochd_core::{CounterAllocator, SnapshotManager};
    use epochd_store::load_latest_checkpoint;
    use std::time::Duration;
    use tempfile::TempDir;
    use ulid::Ulid;

    #[tokio::test]
    async fn writes_checkpoint_every_n_events() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(dir.path().to_path_buf()).unwrap());
        let snaps = SnapshotManager::new(Arc::new(CounterAllocator::new()));
        let c = Ulid::new();
        storage.create_container(&snaps, c).await.unwrap();

        let task = spawn_checkpointer(snaps.handle(c).await.unwrap(), Arc::clone(&storage), 3, 2);
        for _ in 0..7 {
            snaps.create(c).await.unwrap();
        }

        let checkpoints = storage.container_dir(&c).join("checkpoints");
        let mut latest = None;
        for _ in 0..50 {
            latest = load_latest_checkpoint(&checkpoints).unwrap();
            if latest.as_ref().is_some_and(|cp| cp.last_event_id >= 3) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();

        let latest = latest.expect("a checkpoint should have been written");
        assert!(latest.last_event_id >= 3);
        // One reservation precedes the first snapshot
        assert_eq!(latest.state.len() as u64 + 1, latest.last_event_id);
    }
}
