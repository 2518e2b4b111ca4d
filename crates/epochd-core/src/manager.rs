// ABOUTME: SnapshotManager orchestrates create/list/destroy across per-container registry actors.
// ABOUTME: Validates container existence, bounds each operation by a timeout, and maps failures.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use ulid::Ulid;

use crate::actor::{self, ActorError, EventSink, RegistryHandle};
use crate::allocator::{AllocationError, EpochAllocator};
use crate::epoch::{DestroyTarget, Epoch};
use crate::event::RegistryEvent;
use crate::gc::HeldEpochs;
use crate::registry::{RangeError, RegistryState};

/// Default bound on a single manager operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced to callers of the snapshot manager.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("epoch allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("snapshot at epoch {0} not found")]
    NotFound(Epoch),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("snapshot creation failed after allocating epoch {epoch}: {reason}")]
    CreateFailed { epoch: Epoch, reason: String },

    #[error("registry storage failure: {0}")]
    Storage(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("container not found: {0}")]
    ContainerNotFound(Ulid),

    #[error("container already registered: {0}")]
    ContainerExists(Ulid),

    #[error("registry actor channel closed")]
    ChannelClosed,
}

impl From<ActorError> for SnapshotError {
    fn from(err: ActorError) -> Self {
        match err {
            ActorError::NotFound(epoch) => SnapshotError::NotFound(epoch),
            ActorError::Range(e) => SnapshotError::Range(e),
            ActorError::Persist(msg) => SnapshotError::Storage(msg),
            ActorError::ChannelClosed => SnapshotError::ChannelClosed,
        }
    }
}

/// Owns one registry actor per live container and the epoch allocator that feeds them.
/// Operations on different containers never contend beyond cloning a handle out of the map.
pub struct SnapshotManager {
    registries: RwLock<HashMap<Ulid, RegistryHandle>>,
    allocator: Arc<dyn EpochAllocator>,
    op_timeout: Duration,
}

impl SnapshotManager {
    pub fn new(allocator: Arc<dyn EpochAllocator>) -> Self {
        Self::with_timeout(allocator, DEFAULT_OP_TIMEOUT)
    }

    pub fn with_timeout(allocator: Arc<dyn EpochAllocator>, op_timeout: Duration) -> Self {
        Self {
            registries: RwLock::new(HashMap::new()),
            allocator,
            op_timeout,
        }
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// Start serving a container's registry from `state`, typically empty for a new
    /// container or recovered from disk. The allocator floor is raised to the
    /// recovered high-water mark or reservation, whichever is higher, so no
    /// epoch is ever issued twice.
    pub async fn attach(
        &self,
        container: Ulid,
        state: RegistryState,
        sink: Option<Box<dyn EventSink>>,
    ) -> Result<RegistryHandle, SnapshotError> {
        let mut registries = self.registries.write().await;
        if registries.contains_key(&container) {
            return Err(SnapshotError::ContainerExists(container));
        }

        self.allocator
            .observe(container, state.allocation_floor())
            .await;
        tracing::info!(
            "attached registry for container {} ({} held, high water {})",
            container,
            state.len(),
            state.high_water
        );

        let handle = actor::spawn(container, state, sink);
        registries.insert(container, handle.clone());
        Ok(handle)
    }

    /// Tear down a container's registry, dropping every entry at once.
    pub async fn detach(&self, container: Ulid) -> Result<(), SnapshotError> {
        let removed = self.registries.write().await.remove(&container);
        match removed {
            Some(_) => {
                self.allocator.forget(container).await;
                tracing::info!("detached registry for container {}", container);
                Ok(())
            }
            None => Err(SnapshotError::ContainerNotFound(container)),
        }
    }

    pub async fn exists(&self, container: Ulid) -> bool {
        self.registries.read().await.contains_key(&container)
    }

    /// Ids of all live containers, sorted.
    pub async fn containers(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.registries.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Clone out the handle for a live container.
    pub async fn handle(&self, container: Ulid) -> Result<RegistryHandle, SnapshotError> {
        self.registries
            .read()
            .await
            .get(&container)
            .cloned()
            .ok_or(SnapshotError::ContainerNotFound(container))
    }

    /// Subscribe to a container's registry events.
    pub async fn subscribe(
        &self,
        container: Ulid,
    ) -> Result<broadcast::Receiver<RegistryEvent>, SnapshotError> {
        Ok(self.handle(container).await?.subscribe())
    }

    /// Allocate a fresh epoch and hold it. If the insert fails after allocation
    /// the epoch is abandoned and `CreateFailed` is returned.
    ///
    /// An epoch is only inserted once the registry has durably reserved it, so
    /// an abandoned epoch stays burnt across restarts.
    pub async fn create(&self, container: Ulid) -> Result<Epoch, SnapshotError> {
        self.bounded(async {
            let handle = self.handle(container).await?;
            let epoch = self.allocator.next_epoch(container).await?;
            let reserved = handle.read_state().await.reserved_through;
            if epoch > reserved {
                let through = Epoch(
                    epoch
                        .0
                        .saturating_add(self.allocator.reservation_block()),
                );
                handle.reserve(through).await?;
            }
            handle.insert(epoch).await.map_err(|e| match e {
                ActorError::ChannelClosed => SnapshotError::ChannelClosed,
                other => SnapshotError::CreateFailed {
                    epoch,
                    reason: other.to_string(),
                },
            })?;
            tracing::info!("container {}: created snapshot at epoch {}", container, epoch);
            Ok(epoch)
        })
        .await
    }

    /// Held epochs in ascending order. An empty registry yields an empty list.
    pub async fn list(&self, container: Ulid) -> Result<Vec<Epoch>, SnapshotError> {
        self.bounded(async {
            let held = self.handle(container).await?.list().await;
            Ok(held.into_iter().collect())
        })
        .await
    }

    /// Destroy exactly one held snapshot.
    pub async fn destroy_one(&self, container: Ulid, epoch: Epoch) -> Result<(), SnapshotError> {
        self.bounded(async {
            self.handle(container).await?.remove_one(epoch).await?;
            tracing::info!("container {}: destroyed snapshot at epoch {}", container, epoch);
            Ok(())
        })
        .await
    }

    /// Destroy every held snapshot in `[lo, hi]`, returning how many were removed.
    pub async fn destroy_range(
        &self,
        container: Ulid,
        lo: Epoch,
        hi: Epoch,
    ) -> Result<usize, SnapshotError> {
        self.bounded(async {
            let removed = self.handle(container).await?.remove_range(lo, hi).await?;
            tracing::info!(
                "container {}: destroyed {} snapshots in {}-{}",
                container,
                removed,
                lo,
                hi
            );
            Ok(removed)
        })
        .await
    }

    /// Destroy by target. A single-epoch target reports a count of one.
    pub async fn destroy(
        &self,
        container: Ulid,
        target: DestroyTarget,
    ) -> Result<usize, SnapshotError> {
        match target {
            DestroyTarget::Epoch { epoch } => {
                self.destroy_one(container, epoch).await?;
                Ok(1)
            }
            DestroyTarget::Range { lo, hi } => self.destroy_range(container, lo, hi).await,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, SnapshotError>
    where
        F: Future<Output = Result<T, SnapshotError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("snapshot operation exceeded {:?}", self.op_timeout);
                Err(SnapshotError::Timeout(self.op_timeout))
            }
        }
    }
}

#[async_trait]
impl HeldEpochs for SnapshotManager {
    async fn query_held(&self, container: Ulid) -> Result<BTreeSet<Epoch>, SnapshotError> {
        self.bounded(async { Ok(self.handle(container).await?.list().await) })
            .await
    }
}
