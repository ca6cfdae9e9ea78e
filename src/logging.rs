// src/logging.rs

//! Logging setup for `seedflow`.
//!
//! The filter is chosen as follows:
//! 1. `--log-level` applies one level to everything.
//! 2. Otherwise `SEEDFLOW_LOG` is read as an `EnvFilter` directive string,
//!    so both `debug` and `seedflow::engine=trace,info` work.
//! 3. Otherwise `info`.
//!
//! Messages from the `log` workflow action use the `seedflow::workflow`
//! target and can be tuned separately, e.g. `SEEDFLOW_LOG=warn,seedflow::workflow=info`.
//!
//! Output goes to stderr; stdin may be carrying the replayed events.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

const ENV_VAR: &str = "SEEDFLOW_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(ENV_VAR).ok().as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level_name(level)));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {ENV_VAR} value '{directives}'")),
        None => Ok(EnvFilter::new("info")),
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
