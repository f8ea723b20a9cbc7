use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Application configuration, loadable from CLI or YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Collector address (host:port) for IPFIX export over UDP.
    #[serde(default)]
    pub collector: Option<String>,

    /// Print decoded records to the console.
    #[serde(default)]
    pub output: bool,

    /// Path of the statistics file, rewritten once per second.
    #[serde(default = "default_stats_file")]
    pub stats_file: String,

    /// Quiet mode (suppress non-error logs).
    #[serde(default)]
    pub quiet: bool,
}

fn default_stats_file() -> String {
    "exporterStats".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector: None,
            output: false,
            stats_file: default_stats_file(),
            quiet: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Merge CLI args into config (CLI takes precedence).
    pub fn merge_cli(&mut self, cli: &CliArgs) {
        if cli.collector.is_some() {
            self.collector = cli.collector.clone();
        }
        if cli.output {
            self.output = true;
        }
        if cli.stats_file != default_stats_file() {
            self.stats_file = cli.stats_file.clone();
        }
        if cli.quiet {
            self.quiet = true;
        }
    }

    /// The exporter needs somewhere to put its records.
    pub fn has_sink(&self) -> bool {
        self.collector.is_some() || self.output
    }
}

use clap::Parser;

/// ioamflow: IOAM telemetry to IPFIX exporter
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Collector address and port (host:port) for UDP transmission.
    #[arg(short, long)]
    pub collector: Option<String>,

    /// Print decoded traces to the console.
    #[arg(short, long)]
    pub output: bool,

    /// Statistics file path.
    #[arg(long, default_value = "exporterStats")]
    pub stats_file: String,

    /// Path to YAML config file.
    #[arg(long)]
    pub config: Option<String>,

    /// Quiet mode (suppress non-error logs).
    #[arg(short = 'q', long)]
    pub quiet: bool,
}
