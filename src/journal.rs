//! Upload journal
//!
//! One JSON object per finished session, appended to a shared file. Each
//! record carries the id of the server process that wrote it, so several
//! runs can share one journal.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::upload::UploadReport;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Completed,
    Failed,
}

/// One finished session, serialized as a single JSON line.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadRecord {
    pub timestamp: String,
    pub server_id: String,
    pub session: u64,
    pub peer: String,
    pub path: PathBuf,
    pub status: UploadStatus,
    pub bytes: u64,
    pub seconds: f64,
    pub error: Option<String>,
}

/// JSONL journal shared by all workers of one server process.
pub struct UploadJournal {
    path: PathBuf,
    server_id: Uuid,
    write_lock: Mutex<()>,
}

impl UploadJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        UploadJournal {
            path: path.as_ref().to_path_buf(),
            server_id: Uuid::new_v4(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn record(&self, report: &UploadReport, error: Option<String>) -> Result<()> {
        let entry = UploadRecord {
            timestamp: Utc::now().to_rfc3339(),
            server_id: self.server_id.to_string(),
            session: report.session,
            peer: report.peer.to_string(),
            path: report.path.clone(),
            status: if error.is_none() {
                UploadStatus::Completed
            } else {
                UploadStatus::Failed
            },
            bytes: report.bytes,
            seconds: report.elapsed.as_secs_f64(),
            error,
        };
        self.append(&entry)
    }

    /// Blocking. Async callers run it on the blocking pool.
    fn append(&self, entry: &UploadRecord) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("encode journal record")?;
        line.push('\n');

        // one write per record keeps lines whole between processes
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to journal {}", self.path.display()))?;
        Ok(())
    }

    /// Every record in file order. A journal that was never written is empty.
    pub fn read_all(&self) -> Result<Vec<UploadRecord>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read journal {}", self.path.display()))
            }
        };
        text.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(idx, l)| {
                serde_json::from_str(l).with_context(|| {
                    format!("{} line {}: not a journal record", self.path.display(), idx + 1)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(session: u64, bytes: u64) -> UploadReport {
        UploadReport {
            session,
            peer: "192.168.1.20:40000".parse().unwrap(),
            path: PathBuf::from(format!("uploaded_file_{session}.dat")),
            bytes,
            elapsed: Duration::from_millis(250),
        }
    }

    #[test]
    fn missing_journal_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = UploadJournal::new(dir.path().join("uploads.jsonl"));
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn records_completed_and_failed_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let journal = UploadJournal::new(dir.path().join("uploads.jsonl"));
        journal.record(&report(1, 1024), None).unwrap();
        journal
            .record(&report(2, 10), Some("read from client failed: reset".into()))
            .unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session, 1);
        assert_eq!(entries[0].status, UploadStatus::Completed);
        assert_eq!(entries[0].bytes, 1024);
        assert!(entries[0].error.is_none());
        assert_eq!(entries[1].status, UploadStatus::Failed);
        assert_eq!(entries[1].peer, "192.168.1.20:40000");
        assert!(entries
            .iter()
            .all(|e| e.server_id == journal.server_id().to_string()));
    }

    #[test]
    fn corrupt_line_is_reported_with_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.jsonl");
        let journal = UploadJournal::new(&path);
        journal.record(&report(1, 5), None).unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("\n{\"session\": \n");
        std::fs::write(&path, text).unwrap();

        let err = journal.read_all().unwrap_err();
        assert!(format!("{:#}", err).contains("line 3"), "{:#}", err);
    }

    #[test]
    fn unwritable_journal_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let journal = UploadJournal::new(dir.path().join("missing/uploads.jsonl"));
        let err = journal.record(&report(1, 5), None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
