//! Per-session output files

use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::config::ServerConfig;
use crate::error::UploadError;

/// Maps session ids to output paths: `<dir>/<prefix><id><suffix>`.
#[derive(Clone, Debug)]
pub struct SinkNamer {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl SinkNamer {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(&cfg.out_dir, &cfg.file_prefix, &cfg.file_suffix)
    }

    pub fn path_for(&self, session: u64) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", self.prefix, session, self.suffix))
    }
}

/// Buffered output file owned by exactly one session.
pub struct OutputSink {
    writer: BufWriter<File>,
}

impl OutputSink {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: PathBuf, buffer_size: usize) -> Result<Self, UploadError> {
        let file = match File::create(&path).await {
            Ok(f) => f,
            Err(source) => return Err(UploadError::OpenSink { path, source }),
        };
        Ok(Self {
            writer: BufWriter::with_capacity(buffer_size.max(8 * 1024), file),
        })
    }

    /// Flush buffered bytes and sync file data to disk.
    pub async fn finish(mut self) -> Result<(), UploadError> {
        self.writer.flush().await.map_err(UploadError::Flush)?;
        self.writer
            .get_mut()
            .sync_data()
            .await
            .map_err(UploadError::Flush)?;
        Ok(())
    }
}

impl AsyncWrite for OutputSink {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
