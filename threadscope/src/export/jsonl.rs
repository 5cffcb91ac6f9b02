//! JSON Lines export
//!
//! Every monitor event becomes one line:
//!
//! ```text
//! {"event":"started","timestamp_ms":1700000000000}
//! {"event":"snapshot","timestamp_ms":...,"snapshot":{"sequence":0,"threads":[...],...}}
//! {"event":"deadlock_alert","timestamp_ms":...,"cycles":[{"thread_ids":[1,2],"confidence":0.8}]}
//! {"event":"stopped","timestamp_ms":...}
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::domain::{DeadlockCycle, ExportError, SnapshotBatch};
use crate::monitor::MonitorListener;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ExportRecord<'a> {
    Started { timestamp_ms: u64 },
    Snapshot { timestamp_ms: u64, snapshot: &'a SnapshotBatch },
    DeadlockAlert { timestamp_ms: u64, cycles: &'a [DeadlockCycle] },
    Stopped { timestamp_ms: u64 },
}

/// Listener writing newline-delimited JSON to `W`.
#[derive(Debug)]
pub struct JsonLinesExporter<W: Write + Send> {
    writer: Mutex<W>,
    records: AtomicU64,
}

impl JsonLinesExporter<BufWriter<File>> {
    /// Export to a newly created (truncated) file.
    ///
    /// # Errors
    /// Returns [`ExportError::WriteFailed`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, ExportError> {
        let file = File::create(path)
            .map_err(|e| ExportError::WriteFailed(format!("{}: {e}", path.display())))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonLinesExporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer), records: AtomicU64::new(0) }
    }

    /// Lines written so far
    pub fn records_written(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_record(&self, record: &ExportRecord<'_>) -> Result<(), ExportError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        self.records.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl<W: Write + Send> MonitorListener for JsonLinesExporter<W> {
    fn name(&self) -> &str {
        "JsonLinesExporter"
    }

    fn on_snapshot(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        let timestamp_ms = epoch_millis(batch.timestamp());
        self.write_record(&ExportRecord::Snapshot { timestamp_ms, snapshot: batch })?;
        Ok(())
    }

    fn on_deadlock_alert(&self, cycles: &[DeadlockCycle]) -> anyhow::Result<()> {
        let timestamp_ms = epoch_millis(SystemTime::now());
        self.write_record(&ExportRecord::DeadlockAlert { timestamp_ms, cycles })?;
        Ok(())
    }

    fn on_started(&self) -> anyhow::Result<()> {
        let timestamp_ms = epoch_millis(SystemTime::now());
        self.write_record(&ExportRecord::Started { timestamp_ms })?;
        Ok(())
    }

    fn on_stopped(&self) -> anyhow::Result<()> {
        let timestamp_ms = epoch_millis(SystemTime::now());
        self.write_record(&ExportRecord::Stopped { timestamp_ms })?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)] // millis since epoch fit in u64 for the next half-billion years
fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}
