// src/config/mod.rs

//! Workflow file loading and validation for seedflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate it into workflow definitions and dispatcher limits
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{ActionConfig, ConditionConfig, ConfigFile, ConfigSection, RawConfigFile, WorkflowConfig};
