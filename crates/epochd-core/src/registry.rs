// ABOUTME: Defines RegistryState, the materialized set of held snapshot epochs for one container.
// ABOUTME: State is built by folding registry events; planning helpers validate commands first.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::epoch::Epoch;
use crate::event::{RegistryEvent, RegistryEventPayload};

/// Errors for range removal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("empty epoch range: lo {lo} is greater than hi {hi}")]
    Empty { lo: Epoch, hi: Epoch },
}

/// The held-epoch set of a container, rebuilt by replaying its events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    pub held: BTreeSet<Epoch>,
    /// Largest epoch ever inserted. Survives destroys so the allocator can be re-seeded.
    pub high_water: Epoch,
    /// Highest epoch durably reserved for allocation. Checkpoints written before
    /// reservations existed load as zero.
    #[serde(default)]
    pub reserved_through: Epoch,
    pub last_event_id: u64,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, epoch: Epoch) -> bool {
        self.held.contains(&epoch)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Lowest value the allocator may resume from: nothing at or below it is issued again.
    pub fn allocation_floor(&self) -> Epoch {
        self.high_water.max(self.reserved_through)
    }

    /// Held epochs in ascending order.
    pub fn epochs(&self) -> Vec<Epoch> {
        self.held.iter().copied().collect()
    }

    /// Held epochs inside `[lo, hi]`, ascending. Fails on an inverted range.
    pub fn held_in_range(&self, lo: Epoch, hi: Epoch) -> Result<Vec<Epoch>, RangeError> {
        if lo > hi {
            return Err(RangeError::Empty { lo, hi });
        }
        Ok(self.held.range(lo..=hi).copied().collect())
    }

    /// Apply a single event to this state.
    pub fn apply(&mut self, event: &RegistryEvent) {
        self.last_event_id = event.event_id;

        match &event.payload {
            RegistryEventPayload::SnapshotCreated { epoch } => {
                self.held.insert(*epoch);
                if *epoch > self.high_water {
                    self.high_water = *epoch;
                }
            }

            RegistryEventPayload::SnapshotDestroyed { epoch } => {
                self.held.remove(epoch);
            }

            RegistryEventPayload::SnapshotRangeDestroyed { removed, .. } => {
                for epoch in removed {
                    self.held.remove(epoch);
                }
            }

            RegistryEventPayload::EpochsReserved { through } => {
                self.reserved_through = self.reserved_through.max(*through);
            }
        }
    }
}
