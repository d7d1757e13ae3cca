//! Command-line interface for procward.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for procward.
#[derive(Parser)]
#[command(name = "procward", version, author)]
#[command(about = "A local process supervisor with discovery and crash-safe snapshots", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for procward.
#[derive(Subcommand)]
pub enum Commands {
    /// Supervise the configured processes until interrupted.
    Run {
        /// Path to the configuration file.
        #[arg(short, long, default_value = "procward.yaml")]
        config: String,
    },

    /// Discover running processes once and print them as JSON lines.
    Scan {
        /// Configuration file providing the proc root, namespace and script timeout.
        #[arg(short, long)]
        config: Option<String>,

        /// Process table root to scan.
        #[arg(long, value_name = "DIR")]
        proc_root: Option<String>,

        #[command(subcommand)]
        mode: ScanMode,
    },

    /// Print the records stored in a snapshot file as JSON lines.
    Snapshot {
        /// Configuration file whose snapshot should be read.
        #[arg(short, long)]
        config: Option<String>,

        /// Snapshot file to read. Overrides the configured location.
        #[arg(long, value_name = "FILE")]
        path: Option<String>,
    },
}

/// How a scan finds its processes.
#[derive(Subcommand)]
pub enum ScanMode {
    /// Match command lines against a regular expression (or literal text).
    Pattern {
        query: String,
    },
    /// Run a trusted shell script that prints one PID per line.
    Script {
        script: String,

        /// Kill the script after this long (e.g. `10s`).
        #[arg(long, value_name = "DURATION")]
        timeout: Option<String>,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
