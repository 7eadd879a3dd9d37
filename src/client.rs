//! Minimal sender: one connection per upload, raw bytes, then close.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Stream everything from `reader` to the receiver at `addr` and close the
/// write side. Returns the number of bytes sent.
pub async fn send_reader<A, R>(addr: A, reader: &mut R) -> Result<u64>
where
    A: ToSocketAddrs,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut stream = TcpStream::connect(addr).await.context("connect to receiver")?;
    let _ = stream.set_nodelay(true);
    let sent = tokio::io::copy(reader, &mut stream)
        .await
        .context("stream upload")?;
    stream.shutdown().await.context("close upload stream")?;
    Ok(sent)
}

pub async fn send_file<A: ToSocketAddrs>(addr: A, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    send_reader(addr, &mut file).await
}

pub async fn send_bytes<A: ToSocketAddrs>(addr: A, data: &[u8]) -> Result<u64> {
    let mut reader = data;
    send_reader(addr, &mut reader).await
}
