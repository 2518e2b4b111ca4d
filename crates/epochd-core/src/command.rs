// ABOUTME: Defines the RegistryCommand enum, the only write operations a registry actor accepts.
// ABOUTME: Commands are validated against current state and converted into registry events.

use serde::{Deserialize, Serialize};

use crate::epoch::Epoch;

/// A requested mutation of one container's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryCommand {
    /// Add an epoch. Inserting an already held epoch is a no-op success.
    Insert { epoch: Epoch },
    /// Remove exactly one epoch, failing if it is not held.
    RemoveOne { epoch: Epoch },
    /// Remove every held epoch in `[lo, hi]`.
    RemoveRange { lo: Epoch, hi: Epoch },
    /// Durably reserve every epoch up to `through`. Lower reservations are no-ops.
    Reserve { through: Epoch },
}
