//! Error types for the upload receiver.
//!
//! Library code returns these typed errors; binaries wrap them in
//! `anyhow` with context at the edges.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures inside a single upload session.
///
/// None of these escape a worker: they are logged, journaled and the
/// session ends.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The output file could not be created.
    #[error("failed to create {}: {source}", .path.display())]
    OpenSink { path: PathBuf, source: io::Error },

    /// Reading from the client socket failed (reset, aborted, ...).
    #[error("read from client failed: {0}")]
    Read(#[source] io::Error),

    /// Writing a received chunk to the output file failed.
    #[error("write to output failed: {0}")]
    Write(#[source] io::Error),

    /// Flushing the output file at the end of a session failed.
    #[error("flush of output failed: {0}")]
    Flush(#[source] io::Error),

    /// The client sent nothing for longer than the configured idle timeout.
    #[error("client idle for more than {0:?}")]
    IdleTimeout(Duration),
}

/// Failures of the listener or its configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound. Fatal.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The pool's waiting queue is at its configured limit.
    #[error("upload queue full, session {id} rejected")]
    QueueFull { id: u64 },
}
