//! Write-ahead log for document-id lifecycle events.
//!
//! The id mapper hands out internal ids before the external→internal
//! mapping is committed to the store. If the process dies in that window
//! the ids would leak: nothing in the store remembers they were issued.
//! The WAL closes the window by durably recording each issued id before the
//! mapping commit. On startup a non-empty log means the last run may have
//! died mid-commit and recovery is needed; the records themselves are
//! schema-neutral and downstream components decide what replay means.
//!
//! # Record format
//!
//! Each record is `op:u8 || id:uN le` where `op` is one of
//! [`WalOp::VectorAdd`] (1), [`WalOp::VectorDelete`] (2) or
//! [`WalOp::VectorUpdate`] (3) and `uN` is the build's [`DocId`] width.
//! There is no file header; a non-empty file is a file with entries.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use latticedb_core::{DocId, DOC_ID_BYTES};
use tracing::debug;

use crate::engine::{StorageError, StorageResult};

/// Size of one serialized record.
const RECORD_LEN: usize = 1 + DOC_ID_BYTES;

/// Operation kinds recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    /// An internal id was issued (fresh or reused) for an incoming vector.
    VectorAdd = 1,
    /// A vector was deleted and its id queued for reuse.
    VectorDelete = 2,
    /// A vector was rewritten in place under an existing id.
    VectorUpdate = 3,
}

impl WalOp {
    fn from_u8(op: u8) -> Option<Self> {
        match op {
            1 => Some(Self::VectorAdd),
            2 => Some(Self::VectorDelete),
            3 => Some(Self::VectorUpdate),
            _ => None,
        }
    }
}

/// One id lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalRecord {
    /// The operation kind.
    pub op: WalOp,
    /// The internal id the operation concerns.
    pub doc_id: DocId,
}

impl WalRecord {
    /// Create a record.
    #[must_use]
    pub const fn new(op: WalOp, doc_id: DocId) -> Self {
        Self { op, doc_id }
    }
}

/// Append-only log of id lifecycle records.
///
/// Appends are serialized by a mutex, written through a buffered writer and
/// fsynced before returning, so a record that [`append`](IdWal::append)
/// reported as written survives a crash. Logging can be switched off for
/// bulk loads where the caller accepts the recovery gap.
pub struct IdWal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    enabled: AtomicBool,
    has_entries: AtomicBool,
}

impl IdWal {
    /// Open (or create) the log file at `path`, positioned for appending.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let existing = file.metadata()?.len();
        if existing > 0 {
            debug!(path = %path.display(), bytes = existing, "id WAL has entries pending recovery");
        }
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            enabled: AtomicBool::new(true),
            has_entries: AtomicBool::new(existing > 0),
        })
    }

    /// Whether the log held records when it was opened, or has received any
    /// since. A true value on startup triggers recovery.
    #[must_use]
    pub fn has_entries(&self) -> bool {
        self.has_entries.load(Ordering::Acquire)
    }

    /// Append a batch of records and flush them to stable storage.
    ///
    /// A disabled log drops the batch silently.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the write or sync fails; on failure
    /// none of the batch should be assumed durable.
    pub fn append(&self, records: &[WalRecord]) -> StorageResult<()> {
        if records.is_empty() || !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut writer = self.writer.lock().map_err(|_| {
            StorageError::Internal("id WAL writer lock poisoned".to_string())
        })?;
        for record in records {
            writer.write_all(&[record.op as u8])?;
            writer.write_all(&record.doc_id.to_le_bytes())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        self.has_entries.store(true, Ordering::Release);
        Ok(())
    }

    /// Read every record currently in the log, in append order.
    ///
    /// A trailing partial record (torn write) terminates the scan without an
    /// error; everything before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be read, or
    /// [`StorageError::Corruption`] on an unknown op code.
    pub fn read_records(&self) -> StorageResult<Vec<WalRecord>> {
        let mut bytes = Vec::new();
        File::open(&self.path)?.read_to_end(&mut bytes)?;

        let mut records = Vec::with_capacity(bytes.len() / RECORD_LEN);
        for chunk in bytes.chunks_exact(RECORD_LEN) {
            let op = WalOp::from_u8(chunk[0]).ok_or_else(|| {
                StorageError::Corruption(format!("unknown WAL op code {}", chunk[0]))
            })?;
            let id_bytes: [u8; DOC_ID_BYTES] =
                chunk[1..].try_into().expect("chunk length is fixed");
            records.push(WalRecord::new(op, DocId::from_le_bytes(id_bytes)));
        }
        Ok(records)
    }

    /// Truncate the log and reopen it for appending.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be recreated.
    pub fn clear(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock().map_err(|_| {
            StorageError::Internal("id WAL writer lock poisoned".to_string())
        })?;
        File::create(&self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = BufWriter::new(file);
        self.has_entries.store(false, Ordering::Release);
        Ok(())
    }

    /// Stop recording until [`enable`](IdWal::enable) is called.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Resume recording.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_log_has_no_entries() {
        let dir = tempdir().unwrap();
        let wal = IdWal::open(dir.path().join("wal.bin")).unwrap();
        assert!(!wal.has_entries());
        assert!(wal.read_records().unwrap().is_empty());
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let wal = IdWal::open(dir.path().join("wal.bin")).unwrap();

        wal.append(&[
            WalRecord::new(WalOp::VectorAdd, 1),
            WalRecord::new(WalOp::VectorAdd, 2),
            WalRecord::new(WalOp::VectorDelete, 1),
        ])
        .unwrap();

        let records = wal.read_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], WalRecord::new(WalOp::VectorAdd, 1));
        assert_eq!(records[2], WalRecord::new(WalOp::VectorDelete, 1));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");

        {
            let wal = IdWal::open(&path).unwrap();
            wal.append(&[WalRecord::new(WalOp::VectorAdd, 7)]).unwrap();
        }

        let wal = IdWal::open(&path).unwrap();
        assert!(wal.has_entries());
        assert_eq!(wal.read_records().unwrap(), vec![WalRecord::new(WalOp::VectorAdd, 7)]);
    }

    #[test]
    fn clear_truncates() {
        let dir = tempdir().unwrap();
        let wal = IdWal::open(dir.path().join("wal.bin")).unwrap();

        wal.append(&[WalRecord::new(WalOp::VectorAdd, 1)]).unwrap();
        wal.clear().unwrap();

        assert!(!wal.has_entries());
        assert!(wal.read_records().unwrap().is_empty());

        // The log keeps accepting records after a clear.
        wal.append(&[WalRecord::new(WalOp::VectorUpdate, 2)]).unwrap();
        assert_eq!(wal.read_records().unwrap(), vec![WalRecord::new(WalOp::VectorUpdate, 2)]);
    }

    #[test]
    fn disabled_log_drops_records() {
        let dir = tempdir().unwrap();
        let wal = IdWal::open(dir.path().join("wal.bin")).unwrap();

        wal.disable();
        wal.append(&[WalRecord::new(WalOp::VectorAdd, 1)]).unwrap();
        assert!(wal.read_records().unwrap().is_empty());

        wal.enable();
        wal.append(&[WalRecord::new(WalOp::VectorAdd, 2)]).unwrap();
        assert_eq!(wal.read_records().unwrap().len(), 1);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        let wal = IdWal::open(&path).unwrap();
        wal.append(&[WalRecord::new(WalOp::VectorAdd, 1)]).unwrap();

        // Simulate a torn write: a lone op byte with no id.
        {
            use std::io::Write as _;
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[1u8]).unwrap();
        }

        let records = wal.read_records().unwrap();
        assert_eq!(records, vec![WalRecord::new(WalOp::VectorAdd, 1)]);
    }

    #[test]
    fn unknown_op_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        {
            use std::io::Write as _;
            let mut f = File::create(&path).unwrap();
            let mut record = vec![9u8];
            record.extend_from_slice(&(1 as DocId).to_le_bytes());
            f.write_all(&record).unwrap();
        }
        let wal = IdWal::open(&path).unwrap();
        assert!(matches!(wal.read_records(), Err(StorageError::Corruption(_))));
    }
}
