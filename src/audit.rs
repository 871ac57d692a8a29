//! Append-only audit sinks.
//!
//! The core emits exactly one verdict per request. Sinks must never block
//! the request path past its deadline and never mutate prior records;
//! unlike the decision cache, an audit sink is a store of record, so write
//! failures are surfaced to the caller (the tower logs them and keeps
//! serving).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::verdict::{Verdict, VerdictSummary};

/// Append-only destination for verdicts.
pub trait AuditSink: Send + Sync {
    /// Append one verdict. Must not block past the request deadline.
    fn append(&self, verdict: &Verdict) -> Result<()>;
}

/// In-memory sink for tests and dashboards.
#[derive(Default)]
pub struct MemorySink {
    verdicts: Mutex<Vec<Verdict>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.verdicts.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate statistics over the recorded verdicts.
    pub fn summary(&self) -> VerdictSummary {
        let mut summary = VerdictSummary::new();
        if let Ok(verdicts) = self.verdicts.lock() {
            for verdict in verdicts.iter() {
                summary.add(verdict);
            }
        }
        summary
    }
}

impl AuditSink for MemorySink {
    fn append(&self, verdict: &Verdict) -> Result<()> {
        self.verdicts
            .lock()
            .map_err(|_| Error::Audit("memory sink lock poisoned".to_string()))?
            .push(verdict.clone());
        Ok(())
    }
}

/// File sink writing one JSON document per line.
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends so interleaved lines stay whole.
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlSink {
    fn append(&self, verdict: &Verdict) -> Result<()> {
        let line = serde_json::to_string(verdict)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Audit("jsonl sink lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Audit(format!("cannot open audit file: {}", e)))?;
        writeln!(file, "{}", line).map_err(|e| Error::Audit(format!("append failed: {}", e)))?;
        Ok(())
    }
}
