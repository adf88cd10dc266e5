//! Occupancy snapshots and where they are stored.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eduvision_common::error::{EduvisionError, EduvisionResult};
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleKind;

/// The latest person count the capture side can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyReading {
    pub people_count: usize,
    pub camera_index: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

/// What caused a snapshot to be taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Manual,
    Scheduled {
        schedule_id: String,
        kind: ScheduleKind,
    },
}

/// One persisted occupancy record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub location_id: String,
    /// When the counted frame was captured.
    pub timestamp: DateTime<Utc>,
    pub people_count: usize,
    pub camera_index: Option<u32>,
    pub trigger: SnapshotTrigger,
}

impl Snapshot {
    pub fn new(location_id: impl Into<String>, reading: OccupancyReading, trigger: SnapshotTrigger) -> Self {
        Self {
            location_id: location_id.into(),
            timestamp: reading.captured_at,
            people_count: reading.people_count,
            camera_index: reading.camera_index,
            trigger,
        }
    }

    pub fn manual(location_id: impl Into<String>, reading: OccupancyReading) -> Self {
        Self::new(location_id, reading, SnapshotTrigger::Manual)
    }
}

/// Persistence collaborator: durably stores snapshots.
pub trait SnapshotSink: Send {
    fn save(&mut self, snapshot: &Snapshot) -> EduvisionResult<()>;
}

/// In-memory sink.
impl SnapshotSink for Vec<Snapshot> {
    fn save(&mut self, snapshot: &Snapshot) -> EduvisionResult<()> {
        self.push(snapshot.clone());
        Ok(())
    }
}

/// Appends snapshots to a JSONL file, one object per line.
///
/// Every snapshot is flushed as soon as it is written; they are rare and
/// each one matters.
pub struct JsonlSnapshotStore {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl JsonlSnapshotStore {
    /// Open (or create) the store, appending to existing content.
    pub fn open(path: impl Into<PathBuf>) -> EduvisionResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Snapshot store opened");

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            written: 0,
        })
    }

    /// Snapshots written through this handle.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> EduvisionResult<()> {
        self.writer
            .flush()
            .map_err(|e| EduvisionError::storage(format!("Failed to flush snapshots: {e}")))
    }

    /// Read every snapshot in `path`. A missing file reads as empty.
    pub fn read_all(path: &Path) -> EduvisionResult<Vec<Snapshot>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    EduvisionError::storage(format!(
                        "Bad snapshot record {} in {}: {e}",
                        n + 1,
                        path.display()
                    ))
                })
            })
            .collect()
    }
}

impl SnapshotSink for JsonlSnapshotStore {
    fn save(&mut self, snapshot: &Snapshot) -> EduvisionResult<()> {
        let json = serde_json::to_string(snapshot)?;
        writeln!(self.writer, "{json}")
            .map_err(|e| EduvisionError::storage(format!("Failed to write snapshot: {e}")))?;
        self.flush()?;
        self.written += 1;

        tracing::info!(
            location = %snapshot.location_id,
            count = snapshot.people_count,
            trigger = ?snapshot.trigger,
            "Snapshot saved"
        );
        Ok(())
    }
}

impl Drop for JsonlSnapshotStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
