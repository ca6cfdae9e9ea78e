// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a workflow step stopped the sequence.
///
/// None of these are retried: the runner halts at the failing step without
/// advancing, and keeps the outputs appended so far.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("no action builder named '{0}'")]
    UnknownBuilder(String),

    #[error("failed to build action '{builder}': {message}")]
    Build { builder: String, message: String },

    #[error("action failed: {0}")]
    Invoke(String),

    #[error("action dropped its continuation without completing")]
    Abandoned,

    #[error("action did not complete within {0:?}")]
    TimedOut(Duration),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SeedflowError>;
