//! An action builder that records when each invocation starts and ends.
//!
//! Parameters of the `record` action:
//! - `label` (string, required)
//! - `mode`: `"sync"` (default), `"async"`, `"fail"`, `"abandon"` or `"never"`
//! - `delay_ms`: delay before completing in `async` mode
//! - `output`: value to complete with; defaults to
//!   `{"label": <label>, "seen": <number of outputs already in the context>}`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tokio::runtime::Handle;

use seedflow::actions::{Action, ActionBuilder, ActionResources, BuilderRegistry};
use seedflow::engine::{Continuation, RunId};
use seedflow::workflow::ExecutionContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Start { run_id: RunId, step: usize, label: String },
    End { run_id: RunId, step: usize, label: String },
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    open: HashMap<RunId, usize>,
    max_open: HashMap<RunId, usize>,
    held: Vec<Continuation>,
}

/// Shared log of invocations. Cheap to clone.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<State>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder(&self) -> RecordingBuilder {
        RecordingBuilder {
            recorder: self.clone(),
        }
    }

    /// Builtins plus the `record` action.
    pub fn registry(&self) -> BuilderRegistry {
        let mut registry = BuilderRegistry::with_builtins();
        registry.register("record", self.builder());
        registry
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.lock().entries.clone()
    }

    /// Labels of the invocations started for `run_id`, in start order.
    pub fn started(&self, run_id: RunId) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .filter_map(|e| match e {
                Entry::Start { run_id: r, label, .. } if *r == run_id => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Total number of invocations started, across all runs.
    pub fn invocations(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Start { .. }))
            .count()
    }

    /// Highest number of simultaneously open invocations seen for `run_id`.
    pub fn max_in_flight(&self, run_id: RunId) -> usize {
        self.lock().max_open.get(&run_id).copied().unwrap_or(0)
    }

    /// Highest per-run in-flight count over every run.
    pub fn max_in_flight_any_run(&self) -> usize {
        self.lock().max_open.values().copied().max().unwrap_or(0)
    }

    /// Continuations kept alive by `never` actions.
    pub fn take_held(&self) -> Vec<Continuation> {
        std::mem::take(&mut self.lock().held)
    }

    fn start(&self, run_id: RunId, step: usize, label: &str) {
        let mut state = self.lock();
        state.entries.push(Entry::Start {
            run_id,
            step,
            label: label.to_string(),
        });
        let open = {
            let open = state.open.entry(run_id).or_insert(0);
            *open += 1;
            *open
        };
        let max = state.max_open.entry(run_id).or_insert(0);
        *max = (*max).max(open);
    }

    fn end(&self, run_id: RunId, step: usize, label: &str) {
        let mut state = self.lock();
        state.entries.push(Entry::End {
            run_id,
            step,
            label: label.to_string(),
        });
        if let Some(open) = state.open.get_mut(&run_id) {
            *open = open.saturating_sub(1);
        }
    }

    fn hold(&self, done: Continuation) {
        self.lock().held.push(done);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sync,
    Async,
    Fail,
    Abandon,
    Never,
}

pub struct RecordingBuilder {
    recorder: Recorder,
}

impl ActionBuilder for RecordingBuilder {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        let Some(label) = params.get("label").and_then(Value::as_str) else {
            bail!("record action needs a 'label'");
        };
        let mode = match params.get("mode").and_then(Value::as_str).unwrap_or("sync") {
            "sync" => Mode::Sync,
            "async" => Mode::Async,
            "fail" => Mode::Fail,
            "abandon" => Mode::Abandon,
            "never" => Mode::Never,
            other => bail!("unknown record mode '{other}'"),
        };
        let delay = Duration::from_millis(params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0));

        Ok(Box::new(RecordingAction {
            label: label.to_string(),
            mode,
            delay,
            output: params.get("output").cloned(),
            recorder: self.recorder.clone(),
            io: resources.io.clone(),
        }))
    }
}

struct RecordingAction {
    label: String,
    mode: Mode,
    delay: Duration,
    output: Option<Value>,
    recorder: Recorder,
    io: Handle,
}

impl Action for RecordingAction {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let (run_id, step) = (done.run_id(), done.step());
        self.recorder.start(run_id, step, &self.label);

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| json!({ "label": self.label, "seen": ctx.actions().len() }));

        match self.mode {
            Mode::Sync => {
                self.recorder.end(run_id, step, &self.label);
                done.complete(output);
            }
            Mode::Async => {
                let recorder = self.recorder.clone();
                let label = self.label.clone();
                let delay = self.delay;
                self.io.spawn(async move {
                    tokio::time::sleep(delay).await;
                    recorder.end(run_id, step, &label);
                    done.complete(output);
                });
            }
            Mode::Fail => {
                self.recorder.end(run_id, step, &self.label);
                bail!("{} failed", self.label);
            }
            Mode::Abandon => {
                self.recorder.end(run_id, step, &self.label);
                drop(done);
            }
            Mode::Never => self.recorder.hold(done),
        }
        Ok(())
    }
}
