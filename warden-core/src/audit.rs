//! Append-only JSONL audit trail of assessment outcomes, for offline
//! evaluation and threshold calibration.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::WardenResult;

/// One line of the audit log. The page URL is stored only as a hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub url_hash: String,
    pub verdict: String,
    pub risk: f64,
    pub layers: Vec<AuditLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLayer {
    pub layer: String,
    pub status: String,
    pub signals: usize,
    pub elapsed_ms: u64,
}

pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> WardenResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &AuditRecord) -> WardenResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
