use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::{interval, Duration};

/// Process-wide event accounting, incremented from concurrent per-event
/// tasks and the receive loop.
#[derive(Debug, Default)]
pub struct Counters {
    /// Events decoded and handled.
    pub accepted: AtomicU64,
    /// Receive errors, treated as kernel buffer overflows.
    pub overflow: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    pub fn render(&self) -> String {
        format!(
            "IOAM messages\t{}\nOverflow errors\t{}\n",
            self.accepted.load(Ordering::Relaxed),
            self.overflow.load(Ordering::Relaxed)
        )
    }
}

/// Truncates and rewrites the statistics file once per second. Write
/// failures are logged and retried on the next tick; they never stop the
/// exporter.
pub async fn run_writer(path: PathBuf, counters: Arc<Counters>) {
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if let Err(e) = tokio::fs::write(&path, counters.render()).await {
            tracing::error!("failed to write stats file {}: {}", path.display(), e);
        }
    }
}
