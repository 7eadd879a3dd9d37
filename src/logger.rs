use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::error::UploadError;
use crate::upload::UploadReport;

/// Event sink for the receiver. Every method defaults to a no-op so
/// implementations only pick the events they care about.
pub trait Logger: Send + Sync {
    fn listening(&self, _addr: SocketAddr, _workers: usize) {}
    fn accepted(&self, _session: u64, _peer: SocketAddr) {}
    fn queued(&self, _session: u64, _waiting: usize) {}
    fn rejected(&self, _session: u64, _peer: SocketAddr, _reason: &str) {}
    fn upload_done(&self, _report: &UploadReport) {}
    fn upload_failed(&self, _report: &UploadReport, _err: &UploadError) {}
    fn accept_failed(&self, _err: &std::io::Error) {}
    fn close_failed(&self, _session: u64, _err: &std::io::Error) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Human readable status lines: progress on stdout, failures on stderr.
pub struct ConsoleLogger {
    verbose: bool,
    quiet: bool,
}

impl ConsoleLogger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
        }
    }

    /// Failures only.
    pub fn quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }
}

impl Logger for ConsoleLogger {
    fn listening(&self, addr: SocketAddr, workers: usize) {
        if !self.quiet {
            println!("Server started on {} ({} workers)", addr, workers);
        }
    }
    fn accepted(&self, session: u64, peer: SocketAddr) {
        if self.verbose {
            println!("Connection {} from {}", session, peer);
        }
    }
    fn queued(&self, session: u64, waiting: usize) {
        if self.verbose {
            println!("Connection {} waiting for a free worker ({} queued)", session, waiting);
        }
    }
    fn rejected(&self, session: u64, peer: SocketAddr, reason: &str) {
        eprintln!("Rejected connection {} from {}: {}", session, peer, reason);
    }
    fn upload_done(&self, r: &UploadReport) {
        if self.quiet {
            return;
        }
        println!(
            "File uploaded successfully by session {} ({} bytes from {} -> {})",
            r.session,
            r.bytes,
            r.peer,
            r.path.display()
        );
    }
    fn upload_failed(&self, r: &UploadReport, err: &UploadError) {
        eprintln!(
            "Error handling file upload {} from {} after {} bytes: {}",
            r.session, r.peer, r.bytes, err
        );
    }
    fn accept_failed(&self, err: &std::io::Error) {
        eprintln!("Error accepting connection: {}", err);
    }
    fn close_failed(&self, session: u64, err: &std::io::Error) {
        eprintln!("Error closing socket for session {}: {}", session, err);
    }
    fn error(&self, context: &str, msg: &str) {
        eprintln!("Error ({}): {}", context, msg);
    }
}

/// Append-only event log, one timestamped `KEY k=v` line per event.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: SocketAddr, workers: usize) {
        self.line(&format!("LISTEN addr={} workers={}", addr, workers));
    }
    fn accepted(&self, session: u64, peer: SocketAddr) {
        self.line(&format!("ACCEPT session={} peer={}", session, peer));
    }
    fn queued(&self, session: u64, waiting: usize) {
        self.line(&format!("QUEUE session={session} waiting={waiting}"));
    }
    fn rejected(&self, session: u64, peer: SocketAddr, reason: &str) {
        self.line(&format!("REJECT session={} peer={} reason={}", session, peer, reason));
    }
    fn upload_done(&self, r: &UploadReport) {
        self.line(&format!(
            "DONE session={} peer={} path={} bytes={} seconds={:.3}",
            r.session,
            r.peer,
            r.path.display(),
            r.bytes,
            r.elapsed.as_secs_f64()
        ));
    }
    fn upload_failed(&self, r: &UploadReport, err: &UploadError) {
        self.line(&format!(
            "FAIL session={} peer={} path={} bytes={} msg={}",
            r.session,
            r.peer,
            r.path.display(),
            r.bytes,
            err
        ));
    }
    fn accept_failed(&self, err: &std::io::Error) {
        self.line(&format!("ERROR ctx=accept msg={}", err));
    }
    fn close_failed(&self, session: u64, err: &std::io::Error) {
        self.line(&format!("ERROR ctx=close session={} msg={}", session, err));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}

/// Forwards every event to each inner logger in order.
pub struct TeeLogger {
    inner: Vec<Arc<dyn Logger>>,
}

impl TeeLogger {
    pub fn new(inner: Vec<Arc<dyn Logger>>) -> Self {
        Self { inner }
    }
}

impl Logger for TeeLogger {
    fn listening(&self, addr: SocketAddr, workers: usize) {
        self.inner.iter().for_each(|l| l.listening(addr, workers));
    }
    fn accepted(&self, session: u64, peer: SocketAddr) {
        self.inner.iter().for_each(|l| l.accepted(session, peer));
    }
    fn queued(&self, session: u64, waiting: usize) {
        self.inner.iter().for_each(|l| l.queued(session, waiting));
    }
    fn rejected(&self, session: u64, peer: SocketAddr, reason: &str) {
        self.inner.iter().for_each(|l| l.rejected(session, peer, reason));
    }
    fn upload_done(&self, report: &UploadReport) {
        self.inner.iter().for_each(|l| l.upload_done(report));
    }
    fn upload_failed(&self, report: &UploadReport, err: &UploadError) {
        self.inner.iter().for_each(|l| l.upload_failed(report, err));
    }
    fn accept_failed(&self, err: &std::io::Error) {
        self.inner.iter().for_each(|l| l.accept_failed(err));
    }
    fn close_failed(&self, session: u64, err: &std::io::Error) {
        self.inner.iter().for_each(|l| l.close_failed(session, err));
    }
    fn error(&self, context: &str, msg: &str) {
        self.inner.iter().for_each(|l| l.error(context, msg));
    }
}
