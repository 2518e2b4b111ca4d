// ABOUTME: Persistence layer for epochd, making each container's snapshot registry survive restart.
// ABOUTME: Provides the JSONL registry log, registry checkpoints, crash recovery and the on-disk layout.

pub mod checkpoint;
pub mod jsonl;
pub mod manager;
pub mod recovery;

pub use checkpoint::{
    CheckpointError, RegistryCheckpoint, load_latest_checkpoint, prune_checkpoints,
    save_checkpoint,
};
pub use jsonl::{JsonlError, JsonlLog};
pub use manager::{ManagerError, StorageManager};
pub use recovery::{RecoveryError, recover_container};
