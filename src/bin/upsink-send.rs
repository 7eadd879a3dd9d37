use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;

use upsink::cli::SendOpts;
use upsink::client;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = SendOpts::parse();
    for path in &opts.files {
        let started = Instant::now();
        let sent = client::send_file(opts.addr.as_str(), path)
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;
        println!(
            "Sent {} ({} bytes in {:.3}s)",
            path.display(),
            sent,
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}
