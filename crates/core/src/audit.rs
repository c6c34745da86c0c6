//! Rejected-mutation audit log.
//!
//! A mutation that validated at enqueue time can still fail at sequence
//! time because the leaf changed underneath it. The sequencer drops such
//! mutations without aborting the revision, but every drop is recorded
//! through an [`AuditLogger`] so operators can answer "what happened to my
//! update".
//!
//! - [`AuditLogger`] is the pluggable interface
//! - [`FileAuditLogger`] writes JSON Lines with durable writes and size-based
//!   rotation (`rejected.jsonl` → `rejected.jsonl.1` → ... → deleted)
//! - [`MemoryAuditLogger`] retains events in memory for tests and for the
//!   rejected-mutations query
//! - [`NullAuditLogger`] is a no-op

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lattica_keydir_types::config::AuditConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Active audit file name.
const AUDIT_FILE_NAME: &str = "rejected.jsonl";

/// One dropped mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedMutation {
    /// Directory the mutation targeted.
    pub directory_id: String,
    /// Revision that was being built when the mutation was dropped.
    pub revision: u64,
    /// Queue sequence number of the dropped mutation.
    pub seq: u64,
    /// Hex-encoded user id.
    pub user_id: String,
    /// Human-readable rejection reason.
    pub reason: String,
    /// When the drop happened.
    pub rejected_at: DateTime<Utc>,
}

/// Error type for audit operations.
#[derive(Debug, Snafu)]
pub enum AuditError {
    /// Failed to open or create the audit file.
    #[snafu(display("failed to open audit file {path:?}: {source}"))]
    Open {
        /// The file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write an event.
    #[snafu(display("failed to write audit event: {source}"))]
    WriteEvent {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to serialize an event.
    #[snafu(display("failed to serialize audit event: {source}"))]
    Serialize {
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// Failed to rotate the audit file.
    #[snafu(display("failed to rotate audit log: {source}"))]
    Rotate {
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Pluggable audit backend.
///
/// Implementations must be `Send + Sync`; the sequencer calls `record`
/// inline while building a revision, so the event must be persisted before
/// returning.
pub trait AuditLogger: Send + Sync {
    /// Records a dropped mutation.
    fn record(&self, event: &RejectedMutation) -> Result<(), AuditError>;
}

/// No-op audit logger for when auditing is disabled.
pub struct NullAuditLogger;

impl AuditLogger for NullAuditLogger {
    fn record(&self, _event: &RejectedMutation) -> Result<(), AuditError> {
        Ok(())
    }
}

/// In-memory audit logger.
///
/// Backs the rejected-mutations query and keeps tests free of the
/// filesystem.
#[derive(Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<RejectedMutation>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events.
    pub fn events(&self) -> Vec<RejectedMutation> {
        self.events.lock().clone()
    }

    /// Returns events for one directory and revision.
    pub fn events_for(&self, directory_id: &str, revision: u64) -> Vec<RejectedMutation> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.directory_id == directory_id && e.revision == revision)
            .cloned()
            .collect()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn record(&self, event: &RejectedMutation) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// File-based audit logger with durable writes and rotation.
pub struct FileAuditLogger {
    inner: Mutex<FileAuditInner>,
    config: AuditConfig,
    dir: PathBuf,
}

struct FileAuditInner {
    file: File,
    bytes_written: u64,
}

impl FileAuditLogger {
    /// Creates a logger writing under `dir`.
    pub fn create(dir: &Path, config: AuditConfig) -> Result<Self, AuditError> {
        fs::create_dir_all(dir).context(OpenSnafu { path: dir.to_path_buf() })?;
        let path = dir.join(AUDIT_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(OpenSnafu { path: path.clone() })?;
        let bytes_written =
            file.metadata().map(|m| m.len()).context(OpenSnafu { path: path.clone() })?;

        Ok(Self {
            inner: Mutex::new(FileAuditInner { file, bytes_written }),
            config,
            dir: dir.to_path_buf(),
        })
    }

    /// Rotates `rejected.jsonl` through numbered suffixes, dropping the
    /// oldest.
    fn rotate(&self, inner: &mut FileAuditInner) -> Result<(), AuditError> {
        let active = self.dir.join(AUDIT_FILE_NAME);

        let oldest = self.dir.join(format!("{AUDIT_FILE_NAME}.{}", self.config.max_files));
        if oldest.exists() {
            fs::remove_file(&oldest).context(RotateSnafu)?;
        }
        for n in (1..self.config.max_files).rev() {
            let from = self.dir.join(format!("{AUDIT_FILE_NAME}.{n}"));
            if from.exists() {
                let to = self.dir.join(format!("{AUDIT_FILE_NAME}.{}", n + 1));
                fs::rename(&from, &to).context(RotateSnafu)?;
            }
        }
        fs::rename(&active, self.dir.join(format!("{AUDIT_FILE_NAME}.1")))
            .context(RotateSnafu)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active)
            .context(OpenSnafu { path: active })?;
        inner.file = file;
        inner.bytes_written = 0;
        Ok(())
    }
}

impl AuditLogger for FileAuditLogger {
    fn record(&self, event: &RejectedMutation) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event).context(SerializeSnafu)?;
        line.push(b'\n');

        let mut inner = self.inner.lock();
        if inner.bytes_written + line.len() as u64 > self.config.max_file_bytes {
            self.rotate(&mut inner)?;
        }

        inner.file.write_all(&line).context(WriteEventSnafu)?;
        // Durable before the sequencer moves on
        inner.file.sync_data().context(WriteEventSnafu)?;
        inner.bytes_written += line.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lattica_keydir_test_utils::TestDir;

    use super::*;

    fn event(seq: u64) -> RejectedMutation {
        RejectedMutation {
            directory_id: "d1".to_string(),
            revision: 3,
            seq,
            user_id: "616c696365".to_string(),
            reason: "previous-entry digest mismatch".to_string(),
            rejected_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_logger_records_and_filters() {
        let logger = MemoryAuditLogger::new();
        logger.record(&event(1)).unwrap();
        logger.record(&event(2)).unwrap();

        let mut other = event(3);
        other.revision = 9;
        logger.record(&other).unwrap();

        assert_eq!(logger.events().len(), 3);
        assert_eq!(logger.events_for("d1", 3).len(), 2);
        assert_eq!(logger.events_for("d1", 9).len(), 1);
        assert!(logger.events_for("d2", 3).is_empty());
    }

    #[test]
    fn test_file_logger_writes_jsonl() {
        let dir = TestDir::new();
        let logger = FileAuditLogger::create(dir.path(), AuditConfig::default()).unwrap();

        logger.record(&event(1)).unwrap();
        logger.record(&event(2)).unwrap();

        let contents = fs::read_to_string(dir.join(AUDIT_FILE_NAME)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: RejectedMutation = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.seq, 1);
        assert_eq!(parsed.directory_id, "d1");
    }

    #[test]
    fn test_file_logger_rotates_at_size_limit() {
        let dir = TestDir::new();
        let config = AuditConfig::builder().max_file_bytes(200).max_files(2).build();
        let logger = FileAuditLogger::create(dir.path(), config).unwrap();

        for seq in 0..10 {
            logger.record(&event(seq)).unwrap();
        }

        assert!(dir.join(AUDIT_FILE_NAME).exists());
        assert!(dir.join(format!("{AUDIT_FILE_NAME}.1")).exists());
        // Retention cap honored
        assert!(!dir.join(format!("{AUDIT_FILE_NAME}.3")).exists());
    }

    #[test]
    fn test_null_logger_accepts_everything() {
        NullAuditLogger.record(&event(1)).unwrap();
    }
}
