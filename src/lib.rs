//! Upsink
//!
//! Concurrent raw TCP upload receiver: every accepted connection is drained
//! into its own file by a bounded pool of workers.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod journal;
pub mod logger;
pub mod pool;
pub mod server;
pub mod sink;
pub mod upload;

pub use config::ServerConfig;
pub use error::{ServerError, UploadError};
pub use server::UploadServer;
