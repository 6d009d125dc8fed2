//! Best-effort persistence of recoverable pending requests

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::scheduler::queue::Priority;

/// Most records a single snapshot will hold
pub const SNAPSHOT_CAP: usize = 50;

/// One persisted pending request. Only HIGH-priority, identified requests
/// are worth recovering; everything else is safe to lose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub content: String,
    pub identifier: String,
    pub priority: Priority,
    pub submitted_at: i64,
}

/// Handles writing the queue snapshot to disk and reading it back once
/// after a restart.
pub struct SnapshotStore {
    /// The directory where the snapshot file is stored
    data_dir: PathBuf,

    /// The filename for the snapshot file
    snapshot_filename: String,
}

impl SnapshotStore {
    /// Create a new snapshot store rooted at a data directory
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self {
            data_dir,
            snapshot_filename: "pending_requests.json".to_string(),
        })
    }

    fn snapshot_file_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_filename)
    }

    /// Overwrite the snapshot with the given records, truncated to
    /// [`SNAPSHOT_CAP`]. The write goes through a temp file and rename so an
    /// interrupted process never leaves a corrupt snapshot behind.
    pub fn write(&self, records: &[SnapshotRecord]) -> Result<()> {
        let file_path = self.snapshot_file_path();
        let records = &records[..records.len().min(SNAPSHOT_CAP)];

        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;

        let temp_path = file_path.with_extension("tmp");

        let file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temporary snapshot file: {:?}", temp_path))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, records)
            .with_context(|| "Failed to serialize queue snapshot to JSON")?;

        fs::rename(&temp_path, &file_path)
            .with_context(|| format!("Failed to rename temporary file to {:?}", file_path))?;

        Ok(())
    }

    /// Read the snapshot once and clear it.
    ///
    /// The file is deleted immediately after a successful read so a crash
    /// loop cannot double-process recovered requests. A missing file yields
    /// an empty list.
    pub fn take(&self) -> Result<Vec<SnapshotRecord>> {
        let file_path = self.snapshot_file_path();

        if !file_path.exists() {
            info!("No queue snapshot found at {:?}", file_path);
            return Ok(Vec::new());
        }

        let file = File::open(&file_path)
            .with_context(|| format!("Failed to open snapshot file: {:?}", file_path))?;
        let reader = BufReader::new(file);

        let records: Vec<SnapshotRecord> = serde_json::from_reader(reader)
            .with_context(|| "Failed to deserialize queue snapshot from JSON")?;

        if let Err(e) = fs::remove_file(&file_path) {
            // Recovery still proceeds; the stale file will be overwritten
            warn!("Failed to clear consumed snapshot {:?}: {}", file_path, e);
        }

        info!("Recovered {} pending requests from {:?}", records.len(), file_path);
        Ok(records)
    }
}
