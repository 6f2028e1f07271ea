//! # Journals
//!
//! Two append-only line-JSON files: the pending-receipt journal
//! (`pending-receipts.jsonl`), drained atomically when a batch flushes,
//! and the evidence journal (`evidence-agent.jsonl`), which only ever
//! grows. Both release their file handles on every operation, so a
//! crashed tick never wedges a handle.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use shared_types::{EvidenceRecord, PoseReceipt};

use crate::errors::PoseError;

/// The pending verified receipts awaiting a batch flush.
pub struct ReceiptJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReceiptJournal {
    pub fn open(path: &Path) -> Result<Self, PoseError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    /// Append one verified receipt.
    pub fn append(&self, receipt: &PoseReceipt) -> Result<(), PoseError> {
        let _guard = self.lock.lock();
        let line = serde_json::to_string(receipt).map_err(|e| PoseError::Journal(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Number of pending receipts.
    pub fn len(&self) -> Result<usize, PoseError> {
        let _guard = self.lock.lock();
        Ok(self.read_all_locked()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, PoseError> {
        Ok(self.len()? == 0)
    }

    /// Read the pending receipts without draining.
    pub fn peek(&self) -> Result<Vec<PoseReceipt>, PoseError> {
        let _guard = self.lock.lock();
        self.read_all_locked()
    }

    /// Atomically take every pending receipt and truncate the journal.
    /// Either the caller gets all receipts and the file is empty, or the
    /// file is untouched.
    pub fn drain(&self) -> Result<Vec<PoseReceipt>, PoseError> {
        let _guard = self.lock.lock();
        let receipts = self.read_all_locked()?;
        if receipts.is_empty() {
            return Ok(receipts);
        }
        let tmp = self.path.with_extension("tmp");
        File::create(&tmp)?.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        debug!(count = receipts.len(), "receipt journal drained");
        Ok(receipts)
    }

    fn read_all_locked(&self) -> Result<Vec<PoseReceipt>, PoseError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut receipts = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => warn!(error = %e, "skipping bad receipt journal line"),
            }
        }
        Ok(receipts)
    }
}

/// Append-only evidence log.
pub struct EvidenceJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EvidenceJournal {
    pub fn open(path: &Path) -> Result<Self, PoseError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn append(&self, record: &EvidenceRecord) -> Result<(), PoseError> {
        let _guard = self.lock.lock();
        let line = serde_json::to_string(record).map_err(|e| PoseError::Journal(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<EvidenceRecord>, PoseError> {
        let _guard = self.lock.lock();
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::EvidenceKind;

    fn receipt(id: &str) -> PoseReceipt {
        PoseReceipt {
            challenge_id: id.to_string(),
            node_id: "0xaa".into(),
            response_at_ms: 1,
            response_body: json!({"blockNumber": 1}),
            node_sig: "0x00".into(),
        }
    }

    #[test]
    fn append_then_drain_empties_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ReceiptJournal::open(&dir.path().join("pending-receipts.jsonl")).unwrap();
        journal.append(&receipt("c1")).unwrap();
        journal.append(&receipt("c2")).unwrap();
        assert_eq!(journal.len().unwrap(), 2);

        let drained = journal.drain().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].challenge_id, "c1");
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn pending_receipts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending-receipts.jsonl");
        {
            let journal = ReceiptJournal::open(&path).unwrap();
            journal.append(&receipt("persist")).unwrap();
        }
        let reopened = ReceiptJournal::open(&path).unwrap();
        assert_eq!(reopened.peek().unwrap()[0].challenge_id, "persist");
    }

    #[test]
    fn evidence_journal_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let journal = EvidenceJournal::open(&dir.path().join("evidence-agent.jsonl")).unwrap();
        journal
            .append(&EvidenceRecord {
                kind: EvidenceKind::Timeout,
                subject: "0xbb".into(),
                epoch_id: 4,
                recorded_at_ms: 100,
                detail: "no answer".into(),
            })
            .unwrap();
        journal
            .append(&EvidenceRecord {
                kind: EvidenceKind::Equivocation,
                subject: "v2".into(),
                epoch_id: 4,
                recorded_at_ms: 200,
                detail: "two hashes at height 9".into(),
            })
            .unwrap();
        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].kind, EvidenceKind::Equivocation);
    }
}
