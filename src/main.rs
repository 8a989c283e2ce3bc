//! line-notify - send log messages to LINE Notify from the command line.

use anyhow::Result;
use clap::Parser;
use line_notify_sink::{cli::Cli, config::Config, emit_waiting, EventSink, LineNotifyBuilder, LogEvent};
use std::io::BufRead;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
        error!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("-------------------- Configuration --------------------");
    info!("Endpoint: {}", config.sink.api_url);
    info!("Recipients: {}", config.sink.tokens.len());
    info!("Minimum Level: {}", config.sink.minimum_level);
    match config.sink.block_duplicates_minutes {
        Some(minutes) => info!("Duplicate Blocking: {} minutes", minutes),
        None => info!("Duplicate Blocking: Disabled"),
    }
    info!("-------------------------------------------------------");

    let sink = LineNotifyBuilder::from_config(&config.sink)?.build()?;

    let messages = if cli.messages.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<String>>>()?
    } else {
        cli.messages.clone()
    };

    // Waits for the worker to drain a full queue instead of dropping input.
    let retry_after = Duration::from_millis(config.sink.batching.period_ms);
    for message in messages.into_iter().filter(|m| !m.trim().is_empty()) {
        if let Err(e) = emit_waiting(sink.as_ref(), LogEvent::new(cli.level, message), retry_after).await {
            warn!("Message not queued: {}", e);
        }
    }

    // Flushes everything still queued before exiting.
    sink.dispose().await;
    info!("Done.");
    Ok(())
}
