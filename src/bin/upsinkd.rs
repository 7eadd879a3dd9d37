use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use upsink::cli::DaemonOpts;
use upsink::journal::UploadJournal;
use upsink::logger::{ConsoleLogger, Logger, TeeLogger, TextLogger};
use upsink::UploadServer;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let config = opts.resolve().context("Invalid configuration")?;

    if !config.out_dir.is_dir() {
        anyhow::bail!("Error: Output directory does not exist: {}", config.out_dir.display());
    }

    // Choose loggers once; file logging is optional
    let mut loggers: Vec<Arc<dyn Logger>> = Vec::new();
    if opts.quiet {
        loggers.push(Arc::new(ConsoleLogger::quiet()));
    } else {
        loggers.push(Arc::new(ConsoleLogger::new(opts.verbose)));
    }
    if let Some(ref p) = opts.log_file {
        let text = TextLogger::new(p)
            .with_context(|| format!("Failed to open log file: {}", p.display()))?;
        loggers.push(Arc::new(text));
    }
    let logger: Arc<dyn Logger> = if loggers.len() == 1 {
        loggers.remove(0)
    } else {
        Arc::new(TeeLogger::new(loggers))
    };
    let journal = opts.journal.as_ref().map(|p| Arc::new(UploadJournal::new(p)));

    if !opts.quiet {
        println!("Starting upsink receiver:");
        println!("  Bind:    {}", config.bind);
        println!("  Workers: {}", config.workers);
        println!("  Output:  {}", config.out_dir.display());
        match config.idle_timeout {
            Some(t) => println!("  Idle:    {}s", t.as_secs()),
            None => println!("  Idle:    no timeout"),
        }
        match config.max_queued {
            Some(q) => println!("  Queue:   {} max waiting", q),
            None => println!("  Queue:   unbounded"),
        }
    }

    // First Ctrl-C drains in-flight uploads, second one exits immediately
    let shutdown = Arc::new(Notify::new());
    let pressed = AtomicBool::new(false);
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if pressed.swap(true, Ordering::SeqCst) {
                eprintln!("\nInterrupted again. Exiting (Ctrl-C)...");
                std::process::exit(130);
            }
            eprintln!("\nShutting down, waiting for active uploads (Ctrl-C again to abort)...");
            shutdown.notify_one();
        })
        .context("Error setting Ctrl-C handler")?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let server = UploadServer::bind(config, logger, journal)
            .await
            .context("Failed to start receiver")?;
        server
            .run_until(async move { shutdown.notified().await })
            .await
            .context("Receiver stopped")
    })
}
