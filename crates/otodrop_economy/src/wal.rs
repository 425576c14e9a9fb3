//! # Write-Ahead Log (WAL)
//!
//! **Crash-Safe Ledger Journal**
//!
//! Before any balance or inventory mutation is applied in memory, its ledger
//! operations are appended here as one transaction. If the process dies
//! mid-transaction, recovery on the next open sorts it out:
//! - Committed transactions: returned for replay, in order
//! - Uncommitted transactions: discarded
//! - A ROLLBACK directly after a COMMIT revokes it (the commit failed to sync)
//!
//! ## Guarantees
//!
//! 1. **Durability**: once `commit()` returns, the transaction is fsynced
//! 2. **Atomicity**: a transaction replays completely or not at all
//! 3. **Integrity**: every record carries a CRC32; a torn tail ends recovery
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "OTDJ"]
//! [4 bytes: version]
//! [8 bytes: next LSN at last checkpoint]
//!
//! Entry format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [1 byte: record type (BEGIN/OP/COMMIT/ROLLBACK)]
//! [4 bytes: payload length]
//! [N bytes: payload (JSON-encoded operation)]
//! [4 bytes: CRC32 of above]
//! ```
//!
//! The owner serializes transactions (the store holds its state lock across
//! begin/commit), so at most one transaction is open at a time.
//!
//! A failed fsync poisons the journal: no new transaction can begin until a
//! checkpoint has persisted the in-memory state and emptied the file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EconomyError, EconomyResult};

/// Magic bytes identifying a journal file.
const WAL_MAGIC: &[u8; 4] = b"OTDJ";

/// Current journal format version.
const WAL_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_LEN: u64 = 16;

/// Largest payload a record may carry. Anything longer is a corrupt frame.
const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Journal record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Begin a new transaction.
    Begin = 1,
    /// An operation within a transaction.
    Operation = 2,
    /// Commit the transaction (durable).
    Commit = 3,
    /// Roll back the transaction.
    Rollback = 4,
}

impl RecordType {
    /// Converts from u8.
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Operation),
            3 => Some(Self::Commit),
            4 => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// A journal record read back from disk.
#[derive(Clone, Debug)]
struct WalRecord {
    lsn: u64,
    record_type: RecordType,
    payload: Vec<u8>,
}

fn storage(context: &str, e: impl std::fmt::Display) -> EconomyError {
    EconomyError::Storage(format!("{context}: {e}"))
}

/// A committed transaction read back from the journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedTxn<T> {
    /// LSN of the transaction's BEGIN record.
    pub txn_id: u64,
    /// Operations in append order.
    pub ops: Vec<T>,
}

/// Result of scanning a journal file.
#[derive(Debug)]
pub struct Recovery<T> {
    /// Committed transactions, oldest first.
    pub committed: Vec<CommittedTxn<T>>,
    /// Number of transactions that never reached COMMIT.
    pub discarded: usize,
    /// Byte offset just past the last intact record.
    valid_len: u64,
    /// Next LSN to hand out.
    next_lsn: u64,
}

/// Transaction handle grouping operations.
///
/// Dropping an unfinished transaction writes a ROLLBACK record.
pub struct Transaction<'a> {
    wal: &'a WriteAheadLog,
    /// Transaction ID (LSN of the BEGIN record).
    pub txn_id: u64,
    operations: usize,
    finalized: bool,
}

impl Transaction<'_> {
    /// Appends an operation to the transaction.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` if encoding or the write fails.
    pub fn append<T: Serialize>(&mut self, op: &T) -> EconomyResult<()> {
        let payload = serde_json::to_vec(op).map_err(|e| storage("journal encode", e))?;
        self.wal.write_record(RecordType::Operation, &payload)?;
        self.operations += 1;
        Ok(())
    }

    /// Commits the transaction and fsyncs the journal.
    ///
    /// Returns the number of operations committed.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` if the commit record cannot be made
    /// durable. The transaction is then rolled back on drop, and a failed
    /// fsync poisons the journal.
    pub fn commit(mut self) -> EconomyResult<usize> {
        self.wal.write_record(RecordType::Commit, &[])?;
        if let Err(e) = self.wal.sync() {
            self.wal.poisoned.store(true, Ordering::SeqCst);
            tracing::warn!(txn = self.txn_id, error = %e, "journal sync failed, poisoning");
            return Err(e);
        }
        self.finalized = true;
        Ok(self.operations)
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` if the rollback record cannot be written.
    pub fn rollback(mut self) -> EconomyResult<()> {
        self.finalized = true;
        self.wal.write_record(RecordType::Rollback, &[])?;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            // A COMMIT may already be in the file; a ROLLBACK right after it revokes it.
            let _ = self
                .wal
                .write_record(RecordType::Rollback, &[])
                .and_then(|_| self.wal.sync());
        }
    }
}

/// Write-ahead journal for crash-safe ledger transactions.
pub struct WriteAheadLog {
    path: PathBuf,
    current_lsn: AtomicU64,
    poisoned: AtomicBool,
    file: Mutex<BufWriter<File>>,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("current_lsn", &self.current_lsn.load(Ordering::SeqCst))
            .field("poisoned", &self.poisoned.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    /// Opens or creates a journal file and recovers it.
    ///
    /// A torn or corrupt tail is truncated so new records append cleanly.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` on I/O failure, a foreign magic or an
    /// unsupported version.
    pub fn open<T: DeserializeOwned>(path: impl AsRef<Path>) -> EconomyResult<(Self, Recovery<T>)> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| storage("open journal", e))?;

        let len = file.metadata().map_err(|e| storage("journal metadata", e))?.len();
        let mut writer = BufWriter::new(file);
        if len == 0 {
            Self::write_header(&mut writer, 0)?;
        }

        let recovery = Self::recover::<T>(&path)?;

        let file_len = writer
            .get_ref()
            .metadata()
            .map_err(|e| storage("journal metadata", e))?
            .len();
        if recovery.valid_len < file_len {
            tracing::warn!(
                journal = %path.display(),
                dropped_bytes = file_len - recovery.valid_len,
                "truncating torn journal tail"
            );
            writer
                .get_ref()
                .set_len(recovery.valid_len)
                .map_err(|e| storage("truncate journal", e))?;
        }

        if recovery.discarded > 0 {
            tracing::warn!(
                journal = %path.display(),
                discarded = recovery.discarded,
                "uncommitted journal transactions rolled back"
            );
        }

        let wal = Self {
            path,
            current_lsn: AtomicU64::new(recovery.next_lsn),
            poisoned: AtomicBool::new(false),
            file: Mutex::new(writer),
        };
        Ok((wal, recovery))
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next LSN that will be assigned.
    #[must_use]
    pub fn next_lsn(&self) -> u64 {
        self.current_lsn.load(Ordering::SeqCst)
    }

    /// Raises the LSN counter to at least `lsn`.
    ///
    /// Used when a snapshot records a later position than the journal file,
    /// e.g. after the journal was lost or replaced by an older copy.
    pub fn advance_lsn_to(&self, lsn: u64) {
        self.current_lsn.fetch_max(lsn, Ordering::SeqCst);
    }

    /// Returns true after a commit failed to sync.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` if the journal is poisoned or the
    /// BEGIN record cannot be written.
    pub fn begin_transaction(&self) -> EconomyResult<Transaction<'_>> {
        if self.is_poisoned() {
            return Err(EconomyError::Storage(format!(
                "journal {} is poisoned by a failed sync; checkpoint before writing",
                self.path.display()
            )));
        }
        let lsn = self.write_record(RecordType::Begin, &[])?;
        Ok(Transaction {
            wal: self,
            txn_id: lsn,
            operations: 0,
            finalized: false,
        })
    }

    fn write_header(file: &mut BufWriter<File>, next_lsn: u64) -> EconomyResult<()> {
        file.write_all(WAL_MAGIC)
            .and_then(|()| file.write_all(&WAL_VERSION.to_le_bytes()))
            .and_then(|()| file.write_all(&next_lsn.to_le_bytes()))
            .and_then(|()| file.flush())
            .map_err(|e| storage("write journal header", e))
    }

    fn frame(lsn: u64, record_type: RecordType, payload: &[u8]) -> EconomyResult<Vec<u8>> {
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| {
                EconomyError::Storage(format!("journal payload too large: {} bytes", payload.len()))
            })?;

        let mut buf = Vec::with_capacity(8 + 1 + 4 + payload.len() + 4);
        buf.extend_from_slice(&lsn.to_le_bytes());
        buf.push(record_type as u8);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(payload);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    fn write_record(&self, record_type: RecordType, payload: &[u8]) -> EconomyResult<u64> {
        let mut file = self.file.lock();
        let lsn = self.current_lsn.fetch_add(1, Ordering::SeqCst);
        let frame = Self::frame(lsn, record_type, payload)?;
        file.write_all(&frame).map_err(|e| storage("journal write", e))?;
        Ok(lsn)
    }

    fn sync(&self) -> EconomyResult<()> {
        let mut file = self.file.lock();
        file.flush().map_err(|e| storage("journal flush", e))?;
        file.get_ref().sync_data().map_err(|e| storage("journal sync", e))
    }

    /// Scans the journal, grouping committed operations by transaction.
    fn recover<T: DeserializeOwned>(path: &Path) -> EconomyResult<Recovery<T>> {
        let file = File::open(path).map_err(|e| storage("open journal for recovery", e))?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 16];
        reader
            .read_exact(&mut header)
            .map_err(|e| storage("read journal header", e))?;
        if &header[0..4] != WAL_MAGIC {
            return Err(EconomyError::Storage(format!(
                "{} is not an otodrop journal",
                path.display()
            )));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != WAL_VERSION {
            return Err(EconomyError::Storage(format!(
                "unsupported journal version: {version}"
            )));
        }
        let mut lsn_bytes = [0u8; 8];
        lsn_bytes.copy_from_slice(&header[8..16]);
        let mut next_lsn = u64::from_le_bytes(lsn_bytes);

        let mut committed = Vec::new();
        let mut discarded = 0;
        let mut open: Option<CommittedTxn<T>> = None;
        let mut after_commit = false;
        let mut valid_len = HEADER_LEN;

        while let Some((record, frame_len)) = Self::read_record(&mut reader) {
            next_lsn = next_lsn.max(record.lsn + 1);
            valid_len += frame_len;

            let is_commit = record.record_type == RecordType::Commit;
            match record.record_type {
                RecordType::Begin => {
                    let txn = CommittedTxn {
                        txn_id: record.lsn,
                        ops: Vec::new(),
                    };
                    if open.replace(txn).is_some() {
                        discarded += 1;
                    }
                }
                RecordType::Operation => {
                    let Some(txn) = open.as_mut() else {
                        tracing::warn!(lsn = record.lsn, "journal operation outside a transaction");
                        continue;
                    };
                    let op = serde_json::from_slice(&record.payload)
                        .map_err(|e| storage("decode journal operation", e))?;
                    txn.ops.push(op);
                }
                RecordType::Commit => {
                    if let Some(txn) = open.take() {
                        committed.push(txn);
                    }
                }
                RecordType::Rollback => {
                    // ROLLBACK right after COMMIT: the commit never synced and
                    // was never applied.
                    if open.take().is_none() && after_commit {
                        if let Some(revoked) = committed.pop() {
                            tracing::warn!(txn = revoked.txn_id, "journal commit revoked");
                            discarded += 1;
                        }
                    }
                }
            }
            after_commit = is_commit;
        }

        if open.is_some() {
            discarded += 1;
        }

        Ok(Recovery {
            committed,
            discarded,
            valid_len,
            next_lsn,
        })
    }

    /// Reads one record; `None` at end of file or on a torn/corrupt frame.
    fn read_record(reader: &mut BufReader<File>) -> Option<(WalRecord, u64)> {
        let mut head = [0u8; 13];
        reader.read_exact(&mut head).ok()?;

        let mut lsn_bytes = [0u8; 8];
        lsn_bytes.copy_from_slice(&head[0..8]);
        let lsn = u64::from_le_bytes(lsn_bytes);
        let record_type = RecordType::from_u8(head[8])?;
        let payload_len = u32::from_le_bytes([head[9], head[10], head[11], head[12]]);
        if payload_len > MAX_PAYLOAD_LEN {
            tracing::warn!(lsn, payload_len, "journal record length out of range");
            return None;
        }

        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload).ok()?;

        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes).ok()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head);
        hasher.update(&payload);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            tracing::warn!(lsn, "journal CRC mismatch");
            return None;
        }

        let frame_len = 13 + u64::from(payload_len) + 4;
        Some((
            WalRecord {
                lsn,
                record_type,
                payload,
            },
            frame_len,
        ))
    }

    /// Truncates the journal to an empty header and clears poisoning.
    ///
    /// Call this only after the state the journal describes has been
    /// persisted elsewhere (the store snapshot).
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` on I/O failure.
    pub fn checkpoint(&self) -> EconomyResult<()> {
        let mut file = self.file.lock();
        file.flush().map_err(|e| storage("journal flush", e))?;
        file.get_ref()
            .set_len(0)
            .map_err(|e| storage("truncate journal", e))?;
        Self::write_header(&mut file, self.current_lsn.load(Ordering::SeqCst))?;
        file.get_ref()
            .sync_all()
            .map_err(|e| storage("journal sync", e))?;
        self.poisoned.store(false, Ordering::SeqCst);
        tracing::debug!(journal = %self.path.display(), "journal checkpointed");
        Ok(())
    }
}
