// src/engine/mod.rs

//! Workflow execution engine.
//!
//! This module ties together:
//! - the per-run [`WorkflowRunner`] that advances through a workflow's
//!   actions one at a time
//! - the [`TriggerDispatcher`] that matches session events against loaded
//!   workflows and spawns runners
//! - the [`Admission`] queue that bounds how many runners are active
//! - the [`Runtime`] event loop that reacts to:
//!   - session events from the bus
//!   - finished runs
//!   - workflow reloads
//!   - shutdown signals

use std::time::Duration;

use crate::config::ConfigFile;
use crate::errors::ActionError;

/// Identifier of one workflow run, unique per dispatcher.
pub type RunId = u64;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every action completed.
    Completed,
    /// A step failed; the run stopped at `step` without advancing past it.
    Halted { step: usize, error: ActionError },
    /// The runner was released before reaching the end of its actions.
    Dropped { step: usize },
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Completion signal of a runner; emitted exactly once per runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub outcome: RunOutcome,
    /// Number of actions that completed (length of the output list).
    pub completed_actions: usize,
}

/// Per-runner options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Deadline for a single action. `None` waits indefinitely.
    pub action_timeout: Option<Duration>,
}

/// Runtime options used by the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit once the event source is closed and no run is active
    /// or pending (used for `--once`).
    pub exit_when_idle: bool,
}

/// Control events flowing into the runtime loop.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Replace the loaded workflows (and dispatcher limits).
    Reload(ConfigFile),
    /// A runner fired its completion signal.
    RunFinished(RunReport),
    /// The event source has no more events.
    EventSourceClosed,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod admission;
pub mod dispatcher;
pub mod runner;
pub mod runtime;

pub use admission::{Admission, Admit};
pub use dispatcher::{DispatcherOptions, TriggerDispatcher};
pub use runner::{Continuation, RunnerPhase, WorkflowRunner};
pub use runtime::{Runtime, RuntimeStats};
