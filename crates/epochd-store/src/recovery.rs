// ABOUTME: Crash recovery for a container's snapshot registry.
// ABOUTME: Combines the latest checkpoint with a repaired replay of the registry log tail.

use std::path::Path;

use epochd_core::RegistryState;
use thiserror::Error;

use crate::checkpoint::load_latest_checkpoint;
use crate::jsonl::JsonlLog;

/// File name of a container's registry log.
pub const EVENTS_FILE: &str = "events.jsonl";
/// Directory holding a container's registry checkpoints.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Errors that can occur during recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("jsonl error: {0}")]
    Jsonl(#[from] crate::jsonl::JsonlError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] crate::checkpoint::CheckpointError),
}

/// Recover a container's registry from its storage directory.
///
/// Recovery sequence:
/// 1. Load the latest checkpoint, if any
/// 2. Repair the registry log (drop a torn trailing line)
/// 3. Replay log events newer than the checkpoint
/// 4. Return the recovered state and its last event id
pub fn recover_container(container_dir: &Path) -> Result<(RegistryState, u64), RecoveryError> {
    let events_path = container_dir.join(EVENTS_FILE);
    let checkpoints_dir = container_dir.join(CHECKPOINTS_DIR);

    let (mut state, checkpoint_event_id) = match load_latest_checkpoint(&checkpoints_dir)? {
        Some(cp) => {
            tracing::info!("loaded checkpoint at event {}", cp.last_event_id);
            (cp.state, cp.last_event_id)
        }
        None => {
            tracing::info!("no checkpoint found, starting from empty registry");
            (RegistryState::new(), 0)
        }
    };

    let all_events = if events_path.exists() {
        let kept = JsonlLog::repair(&events_path)?;
        tracing::debug!("registry log holds {} valid events", kept);
        JsonlLog::replay(&events_path)?
    } else {
        Vec::new()
    };

    let tail: Vec<_> = all_events
        .iter()
        .filter(|e| e.event_id > checkpoint_event_id)
        .collect();

    tracing::info!(
        "replaying {} events after checkpoint (total {} events on disk)",
        tail.len(),
        all_events.len()
    );

    for event in tail {
        state.apply(event);
    }

    let last_event_id = state.last_event_id;
    Ok((state, last_event_id))
}
