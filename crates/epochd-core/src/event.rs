// ABOUTME: Defines the event envelope and payload variants recorded in a container's registry log.
// ABOUTME: Events are immutable facts about snapshot epochs entering or leaving the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::epoch::Epoch;

/// An event envelope wrapping a timestamped, sequenced payload for a given container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub event_id: u64,
    pub container_id: Ulid,
    pub timestamp: DateTime<Utc>,
    pub payload: RegistryEventPayload,
}

/// The set of things that can happen to a registry. Replaying them in order
/// rebuilds the held-epoch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEventPayload {
    SnapshotCreated {
        epoch: Epoch,
    },
    SnapshotDestroyed {
        epoch: Epoch,
    },
    /// `removed` lists exactly the epochs that were held inside `[lo, hi]`.
    SnapshotRangeDestroyed {
        lo: Epoch,
        hi: Epoch,
        removed: Vec<Epoch>,
    },
    /// Epochs up to `through` may have been handed out and must never be issued again.
    EpochsReserved {
        through: Epoch,
    },
}

impl RegistryEventPayload {
    /// Snake-case name used for SSE event types and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryEventPayload::SnapshotCreated { .. } => "snapshot_created",
            RegistryEventPayload::SnapshotDestroyed { .. } => "snapshot_destroyed",
            RegistryEventPayload::SnapshotRangeDestroyed { .. } => "snapshot_range_destroyed",
            RegistryEventPayload::EpochsReserved { .. } => "epochs_reserved",
        }
    }
}
