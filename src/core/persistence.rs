//! Persistence collaborator: durable storage of committed operation logs.

use crate::core::error::{Error, Result};
use crate::features::transactions::isolation::TxId;
use crate::features::transactions::Operation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, error};

/// Receives the full operation log of a committing transaction. An
/// implementation must store the batch atomically or not at all.
pub trait Persistence: Send + Sync {
    fn persist(&self, tx_id: TxId, batch: &[Operation]) -> Result<()>;
}

/// One committed transaction as seen by persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedBatch {
    pub tx_id: TxId,
    pub committed_at: SystemTime,
    pub operations: Vec<Operation>,
}

/// Keeps committed batches in memory. `set_failing(true)` makes every
/// subsequent `persist` call fail, which is how tests exercise the
/// commit-time rollback path.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    batches: Mutex<Vec<CommittedBatch>>,
    failing: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn batches(&self) -> Vec<CommittedBatch> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl Persistence for MemoryPersistence {
    fn persist(&self, tx_id: TxId, batch: &[Operation]) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(Error::PersistenceFailure(format!(
                "memory persistence rejected batch of tx={}",
                tx_id
            )));
        }
        self.batches.lock().push(CommittedBatch {
            tx_id,
            committed_at: SystemTime::now(),
            operations: batch.to_vec(),
        });
        Ok(())
    }
}

/// Append-only journal file. Each committed batch is one line:
/// `<crc32 as 8 hex digits> <batch as JSON>`. The line is written with a
/// single `write_all` and synced before `persist` returns.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every batch back. A line whose checksum does not match fails the
    /// whole load; a torn final line without a newline is ignored.
    pub fn load(&self) -> Result<Vec<CommittedBatch>> {
        let _guard = self.file.lock();
        let reader = BufReader::new(File::open(&self.path)?);
        let mut batches = Vec::new();
        let mut lines = reader.split(b'\n').peekable();
        let mut line_no = 0usize;

        while let Some(line) = lines.next() {
            let line = line?;
            line_no += 1;
            if line.is_empty() {
                continue;
            }
            match decode_line(&line) {
                Ok(batch) => batches.push(batch),
                // Only the last line may be torn by a crash mid-write.
                Err(_) if lines.peek().is_none() && !ends_with_newline(&self.path)? => {
                    debug!("Ignoring torn journal tail at line {}", line_no);
                }
                Err(e) => {
                    return Err(Error::Storage(format!(
                        "journal {} line {}: {}",
                        self.path.display(),
                        line_no,
                        e
                    )))
                }
            }
        }

        Ok(batches)
    }
}

impl Persistence for FileJournal {
    fn persist(&self, tx_id: TxId, batch: &[Operation]) -> Result<()> {
        let record = CommittedBatch {
            tx_id,
            committed_at: SystemTime::now(),
            operations: batch.to_vec(),
        };
        let line = encode_line(&record)?;

        let mut file = self.file.lock();
        let written = file.write_all(&line).and_then(|_| file.sync_data());
        if let Err(e) = written {
            error!("Journal write failed for tx={}: {}", tx_id, e);
            return Err(Error::PersistenceFailure(e.to_string()));
        }
        debug!(
            "Journaled tx={} ({} operations, {} bytes)",
            tx_id,
            batch.len(),
            line.len()
        );
        Ok(())
    }
}

fn encode_line(record: &CommittedBatch) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(record)?;
    let checksum = crc32fast::hash(&json);
    let mut line = format!("{:08x} ", checksum).into_bytes();
    line.extend_from_slice(&json);
    line.push(b'\n');
    Ok(line)
}

fn decode_line(line: &[u8]) -> Result<CommittedBatch> {
    if line.len() < 10 || line[8] != b' ' {
        return Err(Error::Serialization("malformed journal line".to_string()));
    }
    let (header, json) = (&line[..8], &line[9..]);
    let expected = std::str::from_utf8(header)
        .ok()
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .ok_or_else(|| Error::Serialization("bad checksum header".to_string()))?;
    let actual = crc32fast::hash(json);
    if expected != actual {
        return Err(Error::Serialization(format!(
            "checksum mismatch - expected: {:08x}, actual: {:08x}",
            expected, actual
        )));
    }
    Ok(serde_json::from_slice(json)?)
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path)?;
    Ok(bytes.last().map_or(true, |b| *b == b'\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::transactions::{Operation, OperationType};
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_ops() -> Vec<Operation> {
        vec![
            Operation::new(1, OperationType::Create, "a", "a", None, Some(json!("x"))),
            Operation::new(
                2,
                OperationType::Update,
                "a",
                "a",
                Some(json!("x")),
                Some(json!("y")),
            ),
        ]
    }

    #[test]
    fn test_memory_persistence_failing_mode() {
        let persistence = MemoryPersistence::new();
        persistence.persist(1, &sample_ops()).unwrap();
        assert_eq!(persistence.batch_count(), 1);

        persistence.set_failing(true);
        let err = persistence.persist(2, &sample_ops()).unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure(_)));
        assert_eq!(persistence.batch_count(), 1);
    }

    #[test]
    fn test_file_journal_reload() {
        let dir = tempdir().unwrap();
        let journal = FileJournal::open(dir.path().join("txn.journal")).unwrap();
        journal.persist(7, &sample_ops()).unwrap();
        journal.persist(8, &sample_ops()[..1]).unwrap();

        let reopened = FileJournal::open(journal.path()).unwrap();
        let batches = reopened.load().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].tx_id, 7);
        assert_eq!(batches[0].operations, sample_ops());
        assert_eq!(batches[1].operations.len(), 1);
    }

    #[test]
    fn test_file_journal_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txn.journal");
        let journal = FileJournal::open(&path).unwrap();
        journal.persist(1, &sample_ops()).unwrap();
        journal.persist(2, &sample_ops()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the first record's JSON body.
        bytes[20] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        assert!(journal.load().is_err());
    }

    #[test]
    fn test_file_journal_ignores_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txn.journal");
        let journal = FileJournal::open(&path).unwrap();
        journal.persist(1, &sample_ops()).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"0badc0de {\"tx_id\":").unwrap();

        let batches = journal.load().unwrap();
        assert_eq!(batches.len(), 1);
    }
}
