// ABOUTME: Shared application state for the epochd HTTP server.
// ABOUTME: Bundles the snapshot manager, GC gate, storage layout, and per-container checkpoint tasks.

use std::collections::HashMap;
use std::sync::Arc;

use epochd_core::{GcGate, SnapshotManager};
use epochd_store::StorageManager;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::checkpointer::spawn_checkpointer;

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub snapshots: Arc<SnapshotManager>,
    pub gc: GcGate<Arc<SnapshotManager>>,
    pub storage: Arc<StorageManager>,
    /// Background tasks that checkpoint each container's registry. Keyed by
    /// container ULID so they can be stopped when the container goes away.
    pub checkpointers: RwLock<HashMap<Ulid, JoinHandle<()>>>,
    pub checkpoint_every: u64,
    pub checkpoints_kept: usize,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(storage: StorageManager, snapshots: SnapshotManager) -> Self {
        let snapshots = Arc::new(snapshots);
        Self {
            gc: GcGate::new(Arc::clone(&snapshots)),
            snapshots,
            storage: Arc::new(storage),
            checkpointers: RwLock::new(HashMap::new()),
            checkpoint_every: 256,
            checkpoints_kept: 2,
        }
    }

    pub fn with_checkpoints(mut self, every: u64, kept: usize) -> Self {
        self.checkpoint_every = every.max(1);
        self.checkpoints_kept = kept.max(1);
        self
    }

    /// Start checkpointing a live container. Replaces any task already running for it.
    pub async fn start_checkpointer(&self, container: Ulid) {
        let handle = match self.snapshots.handle(container).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("not checkpointing container {}: {}", container, e);
                return;
            }
        };
        let task = spawn_checkpointer(
            handle,
            Arc::clone(&self.storage),
            self.checkpoint_every,
            self.checkpoints_kept,
        );
        let old = self.checkpointers.write().await.insert(container, task);
        if let Some(old) = old {
            stop(old).await;
        }
    }

    /// Stop a container's checkpoint task and wait for it to exit, so no
    /// checkpoint write is still in flight once this returns.
    pub async fn stop_checkpointer(&self, container: Ulid) {
        let task = self.checkpointers.write().await.remove(&container);
        if let Some(task) = task {
            stop(task).await;
        }
    }

    /// Stop every checkpoint task. Called on shutdown.
    pub async fn stop_all_checkpointers(&self) {
        let tasks: Vec<_> = self
            .checkpointers
            .write()
            .await
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in tasks {
            stop(task).await;
        }
    }
}

async fn stop(task: JoinHandle<()>) {
    task.abort();
    // Cancelled or finished, the task is gone either way
    let _ = task.await;
}
