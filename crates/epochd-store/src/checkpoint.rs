// ABOUTME: Atomic checkpoints of a container's registry state, so recovery can skip old log entries.
// ABOUTME: Writes checkpoints via tmp + rename, loads the latest by event id, and prunes old ones.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use epochd_core::RegistryState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registry state as of `last_event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCheckpoint {
    pub state: RegistryState,
    pub last_event_id: u64,
    pub saved_at: DateTime<Utc>,
}

impl RegistryCheckpoint {
    pub fn of(state: &RegistryState) -> Self {
        Self {
            state: state.clone(),
            last_event_id: state.last_event_id,
            saved_at: Utc::now(),
        }
    }
}

/// Save a checkpoint as `state_<event_id>.json` using write-to-tmp, fsync, rename.
pub fn save_checkpoint(dir: &Path, data: &RegistryCheckpoint) -> Result<(), CheckpointError> {
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!("state_{}.tmp", data.last_event_id));
    let final_path = dir.join(format!("state_{}.json", data.last_event_id));

    let json = serde_json::to_string_pretty(data)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;

    Ok(())
}

/// All `state_<event_id>.json` files in `dir`, sorted by event id ascending.
fn list_checkpoints(dir: &Path) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        if let Some(rest) = name_str.strip_prefix("state_")
            && let Some(id_str) = rest.strip_suffix(".json")
            && let Ok(event_id) = id_str.parse::<u64>()
        {
            found.push((event_id, entry.path()));
        }
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}

/// Load the checkpoint with the highest event id, or None if there is none.
pub fn load_latest_checkpoint(dir: &Path) -> Result<Option<RegistryCheckpoint>, CheckpointError> {
    match list_checkpoints(dir)?.pop() {
        Some((_, path)) => {
            let contents = fs::read_to_string(&path)?;
            let data: RegistryCheckpoint = serde_json::from_str(&contents)?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

/// Delete all but the newest `keep` checkpoints. Returns how many were deleted.
pub fn prune_checkpoints(dir: &Path, keep: usize) -> Result<usize, CheckpointError> {
    let all = list_checkpoints(dir)?;
    let excess = all.len().saturating_sub(keep);
    for (_, path) in &all[..excess] {
        fs::remove_file(path)?;
    }
    Ok(excess)
}
