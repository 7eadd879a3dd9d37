//! Upload worker: drains one client connection into one output file.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::error::UploadError;
use crate::journal::UploadJournal;
use crate::logger::Logger;
use crate::sink::{OutputSink, SinkNamer};

/// Summary of one finished session, successful or not.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub session: u64,
    pub peer: SocketAddr,
    pub path: PathBuf,
    /// Bytes read from the client and handed to the sink
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Everything a worker needs besides its connection. Shared by all
/// sessions of a server.
pub struct SessionContext {
    pub namer: SinkNamer,
    pub buffer_size: usize,
    pub idle_timeout: Option<Duration>,
    pub logger: Arc<dyn Logger>,
    pub journal: Option<Arc<UploadJournal>>,
}

impl SessionContext {
    pub fn new(
        cfg: &ServerConfig,
        logger: Arc<dyn Logger>,
        journal: Option<Arc<UploadJournal>>,
    ) -> Self {
        Self {
            namer: SinkNamer::from_config(cfg),
            buffer_size: cfg.buffer_size,
            idle_timeout: cfg.idle_timeout,
            logger,
            journal,
        }
    }
}

#[inline]
async fn read_timed<R>(reader: &mut R, buf: &mut [u8], idle: Option<Duration>) -> Result<usize, UploadError>
where
    R: AsyncRead + Unpin,
{
    match idle {
        None => reader.read(buf).await.map_err(UploadError::Read),
        Some(limit) => match timeout(limit, reader.read(buf)).await {
            Ok(res) => res.map_err(UploadError::Read),
            Err(_) => Err(UploadError::IdleTimeout(limit)),
        },
    }
}

/// Copy `reader` into `writer` in chunks of at most `buf_size` bytes until
/// the reader reports end of stream.
///
/// Returns the number of bytes written alongside the outcome, so a failed
/// copy still reports how far it got. Bytes are written strictly in the
/// order they were read.
pub async fn copy_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf_size: usize,
    idle: Option<Duration>,
) -> (u64, Result<(), UploadError>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match read_timed(reader, &mut buf, idle).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return (total, Err(e)),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return (total, Err(UploadError::Write(e)));
        }
        total += n as u64;
    }
    (total, Ok(()))
}

/// Run one upload session to completion.
///
/// Creates exactly one sink, copies until the client closes, flushes the
/// sink even after a failure and closes the connection exactly once.
/// Failures are logged and journaled; nothing is returned to the caller
/// and nothing is retried. A partial file stays on disk.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, session: u64, ctx: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let path = ctx.namer.path_for(session);
    let mut report = UploadReport {
        session,
        peer,
        path: path.clone(),
        bytes: 0,
        elapsed: Duration::ZERO,
    };

    let outcome = match OutputSink::create(path, ctx.buffer_size).await {
        Ok(mut sink) => {
            let (bytes, copied) =
                copy_stream(&mut stream, &mut sink, ctx.buffer_size, ctx.idle_timeout).await;
            report.bytes = bytes;
            let flushed = sink.finish().await;
            copied.and(flushed)
        }
        Err(e) => Err(e),
    };

    match stream.shutdown().await {
        Ok(()) => {}
        // peer already tore the connection down
        Err(e) if e.kind() == ErrorKind::NotConnected => {}
        Err(e) => ctx.logger.close_failed(session, &e),
    }
    drop(stream);

    report.elapsed = started.elapsed();
    let error = match &outcome {
        Ok(()) => {
            ctx.logger.upload_done(&report);
            None
        }
        Err(e) => {
            ctx.logger.upload_failed(&report, e);
            Some(e.to_string())
        }
    };

    if let Some(journal) = ctx.journal.clone() {
        let written = tokio::task::spawn_blocking(move || journal.record(&report, error)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => ctx.logger.error("journal", &format!("{:#}", e)),
            Err(e) => ctx.logger.error("journal", &format!("journal task failed: {}", e)),
        }
    }
}
