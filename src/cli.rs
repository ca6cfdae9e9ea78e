// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `seedflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "seedflow",
    version,
    about = "Run torrent automation workflows against a stream of session events.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Seedflow.toml")]
    pub config: String,

    /// Session events to replay, one JSON object per line.
    ///
    /// Use `-` to read from stdin.
    #[arg(long, value_name = "PATH", default_value = "-")]
    pub events: String,

    /// Exit once the event source is exhausted and all workflows finished.
    #[arg(long)]
    pub once: bool,

    /// Reload workflows when the workflow file changes on disk.
    #[arg(long)]
    pub watch_config: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SEEDFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print workflows, but don't process any events.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
