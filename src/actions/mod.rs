// src/actions/mod.rs

//! Action invocation layer.
//!
//! Every workflow step, builtin or callable, is turned into an [`Action`]
//! and invoked with the run's context and a [`Continuation`] back into the
//! runner.
//!
//! - [`builtin`] holds the session and utility builtins (`log`,
//!   `pause_torrent`, `apply_settings`, `sleep`, ...).
//! - [`move_storage`] is the builtin that waits on the event bus for the
//!   session to report the outcome of a move.
//! - [`exec`] runs shell commands.
//! - [`function`] adapts an opaque [`Callable`](crate::workflow::Callable)
//!   to the same contract.

pub mod builtin;
pub mod exec;
pub mod function;
pub mod move_storage;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::engine::Continuation;
use crate::session::{EventBus, Session};
use crate::workflow::ExecutionContext;

pub use function::FunctionAction;

/// The uniform invocation contract.
///
/// An action either completes synchronously (calls `done.complete(..)`
/// before returning) or keeps `done` and completes later from any thread.
/// It must complete exactly once; `Continuation::complete` consumes the
/// handle, and dropping the handle without completing halts the run.
///
/// Returning `Err` halts the run at this step.
pub trait Action: Send {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()>;
}

/// Builds an [`Action`] from declared parameters plus run-time resources.
///
/// Builders are resolved by name when a step runs, not when workflows are
/// loaded.
pub trait ActionBuilder: Send + Sync {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>>;
}

/// Resources only available at run time.
///
/// All handles are shared with the daemon; an action borrows them for the
/// duration of its invocation.
#[derive(Clone)]
pub struct ActionResources {
    /// Scheduler on which runner steps and asynchronous action work run.
    pub io: Handle,
    pub session: Arc<dyn Session>,
    pub bus: EventBus,
}

impl fmt::Debug for ActionResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionResources")
            .field("session", &self.session)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Named action builders.
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: BTreeMap<String, Arc<dyn ActionBuilder>>,
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.builders.keys()).finish()
    }
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every builtin action.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry.register("move_storage", move_storage::MoveStorageBuilder);
        registry.register("exec", exec::ExecBuilder);
        registry
    }

    /// Register `builder` under `name`, replacing any previous entry.
    pub fn register<B: ActionBuilder + 'static>(&mut self, name: impl Into<String>, builder: B) {
        self.builders.insert(name.into(), Arc::new(builder));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionBuilder>> {
        self.builders.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }
}

/// Helpers shared by builders for reading their parameters.
pub(crate) mod params {
    use anyhow::{anyhow, Result};
    use serde_json::Value;

    pub fn str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
        opt_str(params, key)?.ok_or_else(|| anyhow!("missing required parameter '{key}'"))
    }

    pub fn opt_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(anyhow!("parameter '{key}' must be a string")),
        }
    }

    pub fn bool_or(params: &Value, key: &str, default: bool) -> Result<bool> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(anyhow!("parameter '{key}' must be a boolean")),
        }
    }
}
