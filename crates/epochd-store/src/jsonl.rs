// ABOUTME: Append-only JSONL log of registry events, one container per file.
// ABOUTME: Provides fsync'd append with rollback, sequential replay, and repair of a torn trailing line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use epochd_core::{EventSink, RegistryEvent, SinkError};
use thiserror::Error;

/// Errors that can occur during JSONL log operations.
#[derive(Debug, Error)]
pub enum JsonlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log {0} is poisoned: a failed append could not be rolled back")]
    Poisoned(PathBuf),
}

/// An append-only JSONL registry log backed by a file.
/// Each line is a single JSON-serialized RegistryEvent followed by a newline.
///
/// `len` is the byte length of the acknowledged prefix: every complete line the
/// log has vouched for. Anything past it is cut off before the next append.
pub struct JsonlLog {
    path: PathBuf,
    file: File,
    len: u64,
    poisoned: bool,
}

impl JsonlLog {
    /// Returns the path to the underlying JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or create) a JSONL log file at the given path in append mode,
    /// creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, JsonlError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = complete_prefix_len(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            poisoned: false,
        })
    }

    /// Append a single event as one JSON line and fsync it. The event is durable
    /// once this returns Ok.
    ///
    /// On a failed write or fsync the file is truncated back to the acknowledged
    /// prefix, so a reported failure never leaves the event on disk. If even that
    /// fails the log is poisoned and refuses further appends.
    pub fn append(&mut self, event: &RegistryEvent) -> Result<(), JsonlError> {
        if self.poisoned {
            return Err(JsonlError::Poisoned(self.path.clone()));
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        // A torn tail would merge with this line and take it down on replay
        let on_disk = self.file.metadata()?.len();
        if on_disk != self.len {
            tracing::warn!(
                "cutting {} stray byte(s) from {} before append",
                on_disk.saturating_sub(self.len),
                self.path.display()
            );
            self.truncate_to_acknowledged()?;
        }

        let written = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = written {
            tracing::error!("append to {} failed: {}", self.path.display(), e);
            self.truncate_to_acknowledged()?;
            return Err(e.into());
        }

        self.len += line.len() as u64;
        Ok(())
    }

    fn truncate_to_acknowledged(&mut self) -> Result<(), JsonlError> {
        let result = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = result {
            tracing::error!("could not roll back {}: {}", self.path.display(), e);
            self.poisoned = true;
            return Err(JsonlError::Poisoned(self.path.clone()));
        }
        Ok(())
    }

    /// Replay all events from a JSONL file in order. Empty lines are skipped.
    pub fn replay(path: &Path) -> Result<Vec<RegistryEvent>, JsonlError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RegistryEvent = serde_json::from_str(&line)?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rewrite the file keeping only complete, parseable lines, dropping any
    /// torn data left by a crash mid-append. Returns the count of events kept.
    pub fn repair(path: &Path) -> Result<usize, JsonlError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut valid_lines: Vec<String> = Vec::new();
        let mut dropped = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if serde_json::from_str::<RegistryEvent>(&line).is_ok() {
                valid_lines.push(line);
            } else {
                dropped += 1;
            }
        }

        if dropped == 0 {
            return Ok(valid_lines.len());
        }
        tracing::warn!(
            "dropping {} unparseable line(s) from {}",
            dropped,
            path.display()
        );

        let tmp_path = path.with_extension("jsonl.tmp");
        let mut tmp_file = File::create(&tmp_path)?;
        for line in &valid_lines {
            writeln!(tmp_file, "{}", line)?;
        }
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        // Make the rename durable; the data is already consistent if this fails.
        if let Some(parent) = path.parent()
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }

        Ok(valid_lines.len())
    }
}

/// Byte length of `path` up to and including its last newline.
fn complete_prefix_len(path: &Path) -> Result<u64, std::io::Error> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::with_capacity(len as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i as u64 + 1))
}

impl EventSink for JsonlLog {
    fn append(&mut self, event: &RegistryEvent) -> Result<(), SinkError> {
        JsonlLog::append(self, event).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use epochd_core::{Epoch, RegistryEventPayload};
    use tempfile::TempDir;
    use ulid::Ulid;

    fn created(event_id: u64, epoch: u64) -> RegistryEvent {
        RegistryEvent {
            event_id,
            container_id: Ulid::new(),
            timestamp: Utc::now(),
            payload: RegistryEventPayload::SnapshotCreated {
                epoch: Epoch(epoch),
            },
        }
    }

    #[test]
    fn append_and_replay_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut log = JsonlLog::open(&path).unwrap();
        for i in 1..=3 {
            log.append(&created(i, i * 10)).unwrap();
        }

        let events = JsonlLog::replay(&path).unwrap();
        let ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn replay_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jsonl");
        File::create(&path).unwrap();

        assert!(JsonlLog::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("events.jsonl");
        let log = JsonlLog::open(&path).unwrap();
        assert_eq!(log.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn repair_truncates_torn_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("torn.jsonl");

        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&created(1, 10)).unwrap();
        log.append(&created(2, 20)).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, r#"{{"event_id":3,"container_id":"01H"#).unwrap();
        drop(file);

        assert_eq!(JsonlLog::repair(&path).unwrap(), 2);

        let events = JsonlLog::replay(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_id, 2);
    }

    #[test]
    fn append_after_torn_fragment_keeps_both_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fragment.jsonl");

        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&created(1, 10)).unwrap();

        // A half-written line, as left by a write that died midway
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, r#"{{"event_id":2,"contai"#).unwrap();
        drop(file);

        log.append(&created(2, 20)).unwrap();
        drop(log);

        let events = JsonlLog::replay(&path).unwrap();
        let ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn open_ignores_torn_tail_from_previous_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reopen.jsonl");

        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&created(1, 10)).unwrap();
        drop(log);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, r#"{{"event_id":2"#).unwrap();
        drop(file);

        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&created(2, 20)).unwrap();

        let ids: Vec<u64> = JsonlLog::replay(&path)
            .unwrap()
            .iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn poisoned_log_refuses_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poisoned.jsonl");

        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&created(1, 10)).unwrap();
        log.poisoned = true;

        assert!(matches!(
            log.append(&created(2, 20)),
            Err(JsonlError::Poisoned(_))
        ));
        assert_eq!(JsonlLog::replay(&path).unwrap().len(), 1);
    }

    #[test]
    fn repair_leaves_clean_file_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.jsonl");

        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&created(1, 10)).unwrap();
        drop(log);

        assert_eq!(JsonlLog::repair(&path).unwrap(), 1);
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn works_as_event_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.jsonl");

        let mut sink: Box<dyn EventSink> = Box::new(JsonlLog::open(&path).unwrap());
        sink.append(&created(1, 42)).unwrap();

        let events = JsonlLog::replay(&path).unwrap();
        assert_eq!(
            events[0].payload,
            RegistryEventPayload::SnapshotCreated { epoch: Epoch(42) }
        );
    }
}
