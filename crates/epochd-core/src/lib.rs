// ABOUTME: Core library for epochd: the per-container snapshot registry and everything around it.
// ABOUTME: Defines epochs, registry events and commands, the registry actor, allocators, GC gate and manager.

pub mod actor;
pub mod allocator;
pub mod command;
pub mod epoch;
pub mod event;
pub mod gc;
pub mod manager;
pub mod registry;

pub use actor::{ActorError, EventSink, RegistryHandle, SinkError, spawn};
pub use allocator::{AllocationError, ClockAllocator, CounterAllocator, EpochAllocator};
pub use command::RegistryCommand;
pub use epoch::{DestroyTarget, Epoch, EpochRange, TargetError};
pub use event::{RegistryEvent, RegistryEventPayload};
pub use gc::{GcGate, GcPlan, HeldEpochs, plan_versions};
pub use manager::{SnapshotError, SnapshotManager};
pub use registry::{RangeError, RegistryState};
