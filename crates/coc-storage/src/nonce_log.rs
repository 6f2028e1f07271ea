//! # Persistent Nonce Log
//!
//! The replay-prevention registry shared by P2P inbound auth and the PoSe
//! pipeline: an append-only line-JSON file mirrored by an in-memory map.
//!
//! Writes append one line per consumed fingerprint; once enough appends
//! accumulate (or the map outgrows its cap) the file is compacted by
//! atomically rewriting it from the live map. Expired entries are pruned by
//! TTL on open and on every consume, and the oldest entries are evicted
//! first when the cap is hit.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::StorageError;

/// Compact after this many appends since the last rewrite.
const COMPACT_EVERY: usize = 4096;

#[derive(Serialize, Deserialize)]
struct LogLine {
    fp: String,
    ts: u64,
}

struct Inner {
    entries: HashMap<String, u64>,
    appends_since_compact: usize,
    file: File,
}

/// Append-only nonce registry with TTL pruning and bounded size.
pub struct PersistentNonceLog {
    path: PathBuf,
    ttl_ms: u64,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl PersistentNonceLog {
    /// Open (or create) the log at `path`, replaying surviving entries.
    pub fn open(path: &Path, ttl_ms: u64, max_entries: usize, now_ms: u64) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entries = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogLine>(&line) {
                    Ok(entry) => {
                        if ttl_ms == 0 || now_ms.saturating_sub(entry.ts) < ttl_ms {
                            entries.insert(entry.fp, entry.ts);
                        }
                    }
                    Err(e) => {
                        // A torn tail line from a crash is expected; anything
                        // else is worth a warning.
                        warn!(path = %path.display(), error = %e, "skipping bad nonce-log line");
                    }
                }
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!(path = %path.display(), entries = entries.len(), "nonce log opened");
        Ok(Self {
            path: path.to_path_buf(),
            ttl_ms,
            max_entries,
            inner: Mutex::new(Inner {
                entries,
                appends_since_compact: 0,
                file,
            }),
        })
    }

    /// Consume a fingerprint. Returns `true` the first time, `false` on
    /// replay within the TTL window.
    pub fn consume(&self, fingerprint: &str, now_ms: u64) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();

        if let Some(&seen_at) = inner.entries.get(fingerprint) {
            if self.ttl_ms == 0 || now_ms.saturating_sub(seen_at) < self.ttl_ms {
                return Ok(false);
            }
            // Expired: the nonce becomes usable again.
        }

        inner.entries.insert(fingerprint.to_string(), now_ms);
        let line = serde_json::to_string(&LogLine {
            fp: fingerprint.to_string(),
            ts: now_ms,
        })?;
        writeln!(inner.file, "{line}")?;
        inner.appends_since_compact += 1;

        self.prune_locked(&mut inner, now_ms);
        if inner.appends_since_compact >= COMPACT_EVERY || inner.entries.len() > self.max_entries {
            self.compact_locked(&mut inner)?;
        }
        Ok(true)
    }

    /// Whether a fingerprint is currently consumed (unexpired).
    pub fn contains(&self, fingerprint: &str, now_ms: u64) -> bool {
        let inner = self.inner.lock();
        match inner.entries.get(fingerprint) {
            Some(&ts) => self.ttl_ms == 0 || now_ms.saturating_sub(ts) < self.ttl_ms,
            None => false,
        }
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_locked(&self, inner: &mut Inner, now_ms: u64) {
        if self.ttl_ms > 0 {
            inner
                .entries
                .retain(|_, &mut ts| now_ms.saturating_sub(ts) < self.ttl_ms);
        }
        // Oldest-first eviction once the cap is exceeded.
        while inner.entries.len() > self.max_entries {
            let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, &ts)| ts)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut out = File::create(&tmp)?;
            for (fp, &ts) in &inner.entries {
                let line = serde_json::to_string(&LogLine {
                    fp: fp.clone(),
                    ts,
                })?;
                writeln!(out, "{line}")?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        inner.file = OpenOptions::new().append(true).open(&self.path)?;
        inner.appends_since_compact = 0;
        debug!(path = %self.path.display(), entries = inner.entries.len(), "nonce log compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_at(dir: &tempfile::TempDir, ttl: u64, max: usize) -> PersistentNonceLog {
        PersistentNonceLog::open(&dir.path().join("nonces.log"), ttl, max, 0).unwrap()
    }

    #[test]
    fn first_consume_succeeds_second_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_at(&dir, 60_000, 100);
        assert!(log.consume("fp-1", 1000).unwrap());
        assert!(!log.consume("fp-1", 1001).unwrap());
    }

    #[test]
    fn replay_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonces.log");
        {
            let log = PersistentNonceLog::open(&path, 60_000, 100, 0).unwrap();
            assert!(log.consume("fp-persist", 1000).unwrap());
        }
        let reopened = PersistentNonceLog::open(&path, 60_000, 100, 2000).unwrap();
        assert!(!reopened.consume("fp-persist", 2000).unwrap());
    }

    #[test]
    fn expired_nonce_is_accepted_again() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_at(&dir, 1_000, 100);
        assert!(log.consume("fp-ttl", 0).unwrap());
        assert!(!log.consume("fp-ttl", 999).unwrap());
        assert!(log.consume("fp-ttl", 1_000).unwrap());
    }

    #[test]
    fn cap_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_at(&dir, 0, 3);
        for (i, fp) in ["a", "b", "c", "d"].iter().enumerate() {
            assert!(log.consume(fp, i as u64).unwrap());
        }
        assert_eq!(log.len(), 3);
        // "a" (oldest) was evicted, so it consumes fresh again.
        assert!(log.consume("a", 10).unwrap());
    }

    #[test]
    fn compaction_preserves_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonces.log");
        {
            let log = PersistentNonceLog::open(&path, 0, 10_000, 0).unwrap();
            for i in 0..COMPACT_EVERY + 10 {
                log.consume(&format!("fp-{i}"), i as u64).unwrap();
            }
        }
        let reopened = PersistentNonceLog::open(&path, 0, 10_000, 0).unwrap();
        assert!(!reopened.consume("fp-0", 1).unwrap());
        assert!(!reopened
            .consume(&format!("fp-{}", COMPACT_EVERY + 9), 1)
            .unwrap());
    }

    #[test]
    fn torn_tail_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonces.log");
        {
            let log = PersistentNonceLog::open(&path, 0, 100, 0).unwrap();
            log.consume("good", 1).unwrap();
        }
        // Simulate a crash mid-append.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{{\"fp\":\"torn").unwrap();
        drop(f);
        let reopened = PersistentNonceLog::open(&path, 0, 100, 0).unwrap();
        assert!(!reopened.consume("good", 2).unwrap());
    }
}
