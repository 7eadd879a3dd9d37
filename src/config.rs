//! Receiver configuration
//!
//! Defaults reproduce the classic fixed constants (port 8080, ten workers,
//! 4 KiB reads). A TOML file and CLI flags can override them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ServerError;

pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_THREADS: usize = 10;
pub const BUFFER_SIZE: usize = 4096;
/// Largest accepted `buffer_size`; every session allocates two buffers of it.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;
pub const FILE_PREFIX: &str = "uploaded_file_";
pub const FILE_SUFFIX: &str = ".dat";

/// Fully resolved settings handed to the server at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub bind: String,
    /// Number of uploads copied concurrently
    pub workers: usize,
    /// Directory receiving one file per connection
    pub out_dir: PathBuf,
    /// Bytes requested per socket read
    pub buffer_size: usize,
    /// Abort a session when a single read waits longer than this
    pub idle_timeout: Option<Duration>,
    /// Reject connections once this many are waiting for a worker
    pub max_queued: Option<usize>,
    pub file_prefix: String,
    pub file_suffix: String,
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            workers: MAX_THREADS,
            out_dir: PathBuf::from("."),
            buffer_size: BUFFER_SIZE,
            idle_timeout: None,
            max_queued: None,
            file_prefix: FILE_PREFIX.to_string(),
            file_suffix: FILE_SUFFIX.to_string(),
            nodelay: true,
        }
    }
}

/// On-disk shape of the TOML config. Every key is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub out_dir: Option<PathBuf>,
    pub buffer_size: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub max_queued: Option<usize>,
    pub file_prefix: Option<String>,
    pub file_suffix: Option<String>,
    pub nodelay: Option<bool>,
}

impl FileConfig {
    pub fn from_toml(data: &str) -> Result<Self> {
        let cfg: FileConfig = toml::from_str(data).context("parse config TOML")?;
        Ok(cfg)
    }
}

impl ServerConfig {
    /// Load a TOML file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let file = FileConfig::from_toml(&data)
            .with_context(|| format!("in config {}", path.display()))?;
        let mut cfg = ServerConfig::default();
        cfg.apply(file);
        Ok(cfg)
    }

    /// Overlay every key that is set. `bind` wins over `port`.
    pub fn apply(&mut self, file: FileConfig) {
        if let Some(port) = file.port {
            self.bind = format!("0.0.0.0:{}", port);
        }
        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(w) = file.workers {
            self.workers = w;
        }
        if let Some(d) = file.out_dir {
            self.out_dir = d;
        }
        if let Some(b) = file.buffer_size {
            self.buffer_size = b;
        }
        if let Some(secs) = file.idle_timeout_secs {
            // 0 keeps the timeout disabled
            self.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(q) = file.max_queued {
            self.max_queued = Some(q);
        }
        if let Some(p) = file.file_prefix {
            self.file_prefix = p;
        }
        if let Some(s) = file.file_suffix {
            self.file_suffix = s;
        }
        if let Some(n) = file.nodelay {
            self.nodelay = n;
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.bind.trim().is_empty() {
            return Err(ServerError::Config("bind address is empty".into()));
        }
        if self.workers == 0 {
            return Err(ServerError::Config("workers must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(ServerError::Config("buffer_size must be at least 1".into()));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ServerError::Config(format!(
                "buffer_size {} exceeds the {} byte limit",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }
        if self.max_queued == Some(0) {
            return Err(ServerError::Config(
                "max_queued must be at least 1 (omit it for an unbounded queue)".into(),
            ));
        }
        let is_sep = |c: char| c == '/' || c == '\\';
        if self.file_prefix.contains(is_sep) || self.file_suffix.contains(is_sep) {
            return Err(ServerError::Config(
                "file prefix/suffix must not contain path separators".into(),
            ));
        }
        Ok(())
    }
}
