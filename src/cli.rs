//! Shared CLI helpers and small reusable Clap fragments

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ServerConfig;

/// Receiver daemon options. Flags override the config file, which
/// overrides the built-in defaults.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Upsink - concurrent raw TCP upload receiver")]
pub struct DaemonOpts {
    /// TOML config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long, conflicts_with = "port")]
    pub bind: Option<String>,

    /// Listen on 0.0.0.0:<PORT>
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Uploads copied concurrently
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Directory receiving uploaded files
    #[arg(long = "out-dir", short = 'o')]
    pub out_dir: Option<PathBuf>,

    /// Bytes per socket read
    #[arg(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Drop a client that sends nothing for this many seconds (0 = never)
    #[arg(long = "idle-timeout-secs")]
    pub idle_timeout_secs: Option<u64>,

    /// Reject connections when this many are already waiting for a worker
    #[arg(long = "max-queued")]
    pub max_queued: Option<usize>,

    /// Append timestamped event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append one JSON line per finished upload to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Also print per-connection accept/queue lines
    #[arg(short, long)]
    pub verbose: bool,

    /// No console output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl DaemonOpts {
    /// Defaults, then the config file, then flags.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(port) = self.port {
            cfg.bind = format!("0.0.0.0:{}", port);
        }
        if let Some(bind) = &self.bind {
            cfg.bind = bind.clone();
        }
        if let Some(w) = self.workers {
            cfg.workers = w;
        }
        if let Some(d) = &self.out_dir {
            cfg.out_dir = d.clone();
        }
        if let Some(b) = self.buffer_size {
            cfg.buffer_size = b;
        }
        if let Some(secs) = self.idle_timeout_secs {
            cfg.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(q) = self.max_queued {
            cfg.max_queued = Some(q);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Options for the `upsink-send` helper
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Send files to an upsink receiver, one connection each")]
pub struct SendOpts {
    /// Receiver address (host:port)
    pub addr: String,

    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}
