// ABOUTME: Read-only garbage-collection gate that consults the held-epoch registry.
// ABOUTME: Decides which superseded object versions are no longer visible at any held snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::epoch::Epoch;
use crate::manager::SnapshotError;

/// Read access to a container's held epochs. The gate never mutates the registry.
#[async_trait]
pub trait HeldEpochs: Send + Sync {
    async fn query_held(&self, container: Ulid) -> Result<BTreeSet<Epoch>, SnapshotError>;
}

#[async_trait]
impl<T: HeldEpochs + ?Sized> HeldEpochs for Arc<T> {
    async fn query_held(&self, container: Ulid) -> Result<BTreeSet<Epoch>, SnapshotError> {
        (**self).query_held(container).await
    }
}

/// Outcome of planning reclamation for one object's version history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcPlan {
    pub reclaimable: Vec<Epoch>,
    pub retained: Vec<Epoch>,
}

/// Split `versions` (the epochs at which one object was written) into versions
/// that may be reclaimed and versions that must stay.
///
/// The newest version is always retained. An older version `v` with successor
/// `next` must stay while some held epoch `s` satisfies `v <= s < next`, because
/// `v` is exactly what a reader at `s` sees.
pub fn plan_versions(versions: &[Epoch], held: &BTreeSet<Epoch>) -> GcPlan {
    let mut sorted: Vec<Epoch> = versions.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut plan = GcPlan::default();
    for (i, &v) in sorted.iter().enumerate() {
        let visible = match sorted.get(i + 1) {
            None => true,
            Some(&next) => held.range(v..next).next().is_some(),
        };
        if visible {
            plan.retained.push(v);
        } else {
            plan.reclaimable.push(v);
        }
    }
    plan
}

/// Gate used by the storage engine before reclaiming versioned data.
pub struct GcGate<H> {
    source: H,
}

impl<H: HeldEpochs> GcGate<H> {
    pub fn new(source: H) -> Self {
        Self { source }
    }

    /// Plan reclamation of one object's versions against the container's current registry.
    pub async fn plan(&self, container: Ulid, versions: &[Epoch]) -> Result<GcPlan, SnapshotError> {
        let held = self.source.query_held(container).await?;
        let plan = plan_versions(versions, &held);
        tracing::debug!(
            "gc plan for container {}: {} reclaimable, {} retained ({} held epochs)",
            container,
            plan.reclaimable.len(),
            plan.retained.len(),
            held.len()
        );
        Ok(plan)
    }

    /// Whether `epoch` is currently held and therefore pins data at or below it.
    pub async fn is_held(&self, container: Ulid, epoch: Epoch) -> Result<bool, SnapshotError> {
        Ok(self.source.query_held(container).await?.contains(&epoch))
    }
}
