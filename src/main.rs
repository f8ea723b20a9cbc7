use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dex;
mod export;
mod ipfix;
mod netlink;
mod node;
mod stats;
mod trace;
mod trace_type;
mod wire;

use config::{CliArgs, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    // Load config from file if provided, otherwise use defaults.
    let mut config = if let Some(ref config_path) = cli.config {
        Config::from_file(Path::new(config_path))?
    } else {
        Config::default()
    };
    config.merge_cli(&cli);

    if !config.has_sink() {
        eprintln!("use a collector (--collector) or console print (--output)\n");
        CliArgs::command().print_help()?;
        std::process::exit(1);
    }

    // Logging.
    if config.quiet {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new("error"))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
            ))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Failing to subscribe is fatal: no event could ever arrive.
    let listener = netlink::IoamListener::subscribe()
        .await
        .context("failed to subscribe to IOAM6 kernel events")?;

    let counters = Arc::new(stats::Counters::new());
    tokio::spawn(stats::run_writer(
        PathBuf::from(&config.stats_file),
        counters.clone(),
    ));

    let exporter = Arc::new(export::Exporter::new(&config).await?);
    tracing::info!("IOAM exporter started");

    // Receive loop: nothing here may block. Each event is handed to a
    // fire-and-forget task; ordering between events' export messages is
    // not guaranteed and not needed (the IPFIX sequence number carries
    // order information).
    loop {
        match listener.next().await {
            Ok(events) => {
                for event in events {
                    let exporter = exporter.clone();
                    let counters = counters.clone();
                    tokio::spawn(async move {
                        match exporter.handle_event(event).await {
                            Ok(()) => {
                                counters
                                    .accepted
                                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                            Err(e) => tracing::warn!("dropping event: {:#}", e),
                        }
                    });
                }
            }
            Err(e) => {
                // Best-effort delivery: assume the error is a kernel
                // receive-buffer overflow (ENOBUFS), account it, carry on.
                counters
                    .overflow
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::debug!("receive error, counting as overflow: {}", e);
            }
        }
    }
}
