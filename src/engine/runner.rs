// src/engine/runner.rs

//! One live execution of a workflow.
//!
//! A runner walks its action list strictly one step at a time:
//!
//! - every step runs as its own task posted on the I/O scheduler, never
//!   inline in the caller (`start`) or in the previous action's completion
//!   path (`Continuation::complete`);
//! - the next step is posted only after the current action has completed
//!   *and* its `invoke` call has returned, so two actions of the same run
//!   never overlap;
//! - the output of each action is appended to the context in the same
//!   critical section that advances the index, so
//!   `context.actions().len() == current_index()` between steps.
//!
//! Ownership: the dispatcher holds the runner while it is active, and each
//! in-flight action holds it through its [`Continuation`]. When the last
//! owner lets go, `Drop` fires the completion signal if it has not fired
//! yet.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::{RunId, RunOutcome, RunReport, RunnerOptions};
use crate::actions::{Action, ActionResources, BuilderRegistry, FunctionAction};
use crate::errors::ActionError;
use crate::workflow::{ActionSpec, ExecutionContext, WorkflowDefinition};

/// Lifecycle of a runner. `Destroyed` is the runner being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Idle,
    Running,
    /// Reached the end of its actions, or a step halted the sequence.
    Completed,
}

struct RunnerState {
    phase: RunnerPhase,
    context: ExecutionContext,
    index: usize,
    /// True while the current action's `invoke` is on the stack.
    invoking: bool,
    /// The current action dropped its continuation while still invoking.
    abandoned: bool,
    timeout: Option<AbortHandle>,
}

type FinishCallback = Box<dyn FnOnce(&RunReport) + Send>;

enum FinishSignal {
    Pending(Vec<FinishCallback>),
    Fired(RunReport),
}

/// What to do once the current action's `invoke` has returned.
enum AfterInvoke {
    Advance,
    Wait,
    Halt(ActionError),
}

pub struct WorkflowRunner {
    id: RunId,
    workflow: String,
    actions: Arc<[ActionSpec]>,
    registry: Arc<BuilderRegistry>,
    resources: ActionResources,
    options: RunnerOptions,
    state: Mutex<RunnerState>,
    finished: Mutex<FinishSignal>,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("id", &self.id)
            .field("workflow", &self.workflow)
            .field("phase", &self.phase())
            .field("index", &self.current_index())
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl WorkflowRunner {
    /// Create an idle runner for `definition`, seeded with `context`.
    ///
    /// The action list is captured now; later changes to the loaded
    /// workflows do not affect this run.
    pub fn new(
        id: RunId,
        definition: &WorkflowDefinition,
        context: ExecutionContext,
        registry: Arc<BuilderRegistry>,
        resources: ActionResources,
        options: RunnerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            workflow: definition.name().to_string(),
            actions: Arc::clone(definition.actions()),
            registry,
            resources,
            options,
            state: Mutex::new(RunnerState {
                phase: RunnerPhase::Idle,
                context,
                index: 0,
                invoking: false,
                abandoned: false,
                timeout: None,
            }),
            finished: Mutex::new(FinishSignal::Pending(Vec::new())),
        })
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn phase(&self) -> RunnerPhase {
        self.lock_state().phase
    }

    pub fn current_index(&self) -> usize {
        self.lock_state().index
    }

    /// Snapshot of the run's context.
    pub fn context(&self) -> ExecutionContext {
        self.lock_state().context.clone()
    }

    /// Register a callback for the completion signal.
    ///
    /// If the signal already fired, the callback runs immediately with the
    /// recorded report.
    pub fn on_finished<F>(&self, f: F)
    where
        F: FnOnce(&RunReport) + Send + 'static,
    {
        let report = {
            let mut signal = self.lock_signal();
            match &mut *signal {
                FinishSignal::Pending(callbacks) => {
                    callbacks.push(Box::new(f));
                    return;
                }
                FinishSignal::Fired(report) => report.clone(),
            }
        };
        f(&report);
    }

    /// Channel that receives the report when the completion signal fires.
    pub fn finished_signal(&self) -> oneshot::Receiver<RunReport> {
        let (tx, rx) = oneshot::channel();
        self.on_finished(move |report| {
            let _ = tx.send(report.clone());
        });
        rx
    }

    /// Begin running. Returns false (and does nothing) if the runner was
    /// already started.
    ///
    /// The first step is posted to the scheduler rather than run inline.
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = self.lock_state();
            if state.phase != RunnerPhase::Idle {
                debug!(run_id = self.id, workflow = %self.workflow, "runner already started");
                return false;
            }
            state.phase = RunnerPhase::Running;
        }

        info!(
            run_id = self.id,
            workflow = %self.workflow,
            actions = self.actions.len(),
            "starting workflow run"
        );
        self.schedule();
        true
    }

    fn schedule(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        self.resources.io.spawn(async move {
            runner.run_step();
        });
    }

    fn run_step(self: &Arc<Self>) {
        let (step, ctx) = {
            let mut state = self.lock_state();
            if state.phase != RunnerPhase::Running {
                return;
            }
            if state.index >= self.actions.len() {
                drop(state);
                self.settle(None, RunOutcome::Completed);
                return;
            }
            state.invoking = true;
            state.abandoned = false;
            (state.index, state.context.clone())
        };

        debug!(
            run_id = self.id,
            workflow = %self.workflow,
            step,
            action = self.actions[step].label(),
            "running action {} of {}",
            step + 1,
            self.actions.len()
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.invoke_step(step, &ctx)))
            .unwrap_or_else(|payload| Err(ActionError::Invoke(panic_message(payload.as_ref()))));

        let next = {
            let mut state = self.lock_state();
            state.invoking = false;
            let completed = state.index > step;
            match result {
                Err(err) if completed => {
                    warn!(
                        run_id = self.id,
                        workflow = %self.workflow,
                        step,
                        error = %err,
                        "action failed after completing; keeping its output"
                    );
                    AfterInvoke::Advance
                }
                Err(err) => AfterInvoke::Halt(err),
                Ok(()) if completed => AfterInvoke::Advance,
                Ok(()) if state.abandoned => AfterInvoke::Halt(ActionError::Abandoned),
                Ok(()) => AfterInvoke::Wait,
            }
        };

        match next {
            AfterInvoke::Advance => self.schedule(),
            AfterInvoke::Wait => self.arm_timeout(step),
            AfterInvoke::Halt(err) => self.halt(step, err),
        }
    }

    /// Resolve the action at `step` and invoke it.
    fn invoke_step(self: &Arc<Self>, step: usize, ctx: &ExecutionContext) -> Result<(), ActionError> {
        let action = self.resolve(step)?;
        let done = Continuation::new(Arc::clone(self), step);
        action
            .invoke(ctx, done)
            .map_err(|e| ActionError::Invoke(format!("{e:#}")))
    }

    fn resolve(&self, step: usize) -> Result<Box<dyn Action>, ActionError> {
        match &self.actions[step] {
            ActionSpec::Builtin { builder, params } => {
                let factory = self
                    .registry
                    .get(builder)
                    .ok_or_else(|| ActionError::UnknownBuilder(builder.clone()))?;
                factory
                    .build(params, &self.resources)
                    .map_err(|e| ActionError::Build {
                        builder: builder.clone(),
                        message: format!("{e:#}"),
                    })
            }
            ActionSpec::Callable(callable) => Ok(FunctionAction::new(Arc::clone(callable))),
        }
    }

    /// Record the output of `step` and move on.
    ///
    /// Completions for a step that is no longer current (late, duplicate,
    /// or after the run halted) are ignored.
    fn complete(self: &Arc<Self>, step: usize, output: Value) {
        let schedule_next = {
            let mut state = self.lock_state();
            if state.phase != RunnerPhase::Running || state.index != step {
                warn!(
                    run_id = self.id,
                    workflow = %self.workflow,
                    step,
                    current = state.index,
                    phase = ?state.phase,
                    "ignoring completion for a step that is no longer current"
                );
                return;
            }
            state.context.push_output(output);
            state.index += 1;
            if let Some(timer) = state.timeout.take() {
                timer.abort();
            }
            !state.invoking
        };

        debug!(run_id = self.id, workflow = %self.workflow, step, "action completed");

        if schedule_next {
            self.schedule();
        }
    }

    /// The continuation for `step` was dropped without completing.
    fn abandon(&self, step: usize) {
        {
            let mut state = self.lock_state();
            if state.phase != RunnerPhase::Running || state.index != step {
                return;
            }
            if state.invoking {
                // Decided once `invoke` returns, so a returned error wins.
                state.abandoned = true;
                return;
            }
        }
        self.halt(step, ActionError::Abandoned);
    }

    fn arm_timeout(self: &Arc<Self>, step: usize) {
        let Some(timeout) = self.options.action_timeout else {
            return;
        };

        let runner = Arc::downgrade(self);
        let timer = self.resources.io.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(runner) = runner.upgrade() {
                runner.halt(step, ActionError::TimedOut(timeout));
            }
        });

        let mut state = self.lock_state();
        if state.phase == RunnerPhase::Running && state.index == step {
            if let Some(previous) = state.timeout.replace(timer.abort_handle()) {
                previous.abort();
            }
        } else {
            timer.abort();
        }
    }

    fn halt(&self, step: usize, error: ActionError) {
        self.settle(Some(step), RunOutcome::Halted { step, error });
    }

    /// Move to `Completed` and fire the completion signal.
    ///
    /// No-op unless the runner is running and, when `step` is given, still
    /// on that step.
    fn settle(&self, step: Option<usize>, outcome: RunOutcome) -> bool {
        let completed_actions = {
            let mut state = self.lock_state();
            if state.phase != RunnerPhase::Running {
                return false;
            }
            if step.is_some_and(|s| s != state.index) {
                return false;
            }
            state.phase = RunnerPhase::Completed;
            if let Some(timer) = state.timeout.take() {
                timer.abort();
            }
            state.index
        };

        self.fire(outcome, completed_actions);
        true
    }

    fn fire(&self, outcome: RunOutcome, completed_actions: usize) {
        let report = RunReport {
            run_id: self.id,
            workflow: self.workflow.clone(),
            outcome,
            completed_actions,
        };

        let callbacks = {
            let mut signal = self.lock_signal();
            match &*signal {
                FinishSignal::Fired(_) => return,
                FinishSignal::Pending(_) => {}
            }
            match std::mem::replace(&mut *signal, FinishSignal::Fired(report.clone())) {
                FinishSignal::Pending(callbacks) => callbacks,
                FinishSignal::Fired(_) => Vec::new(),
            }
        };

        match &report.outcome {
            RunOutcome::Completed => info!(
                run_id = self.id,
                workflow = %self.workflow,
                completed_actions,
                "workflow run completed"
            ),
            RunOutcome::Halted { step, error } => error!(
                run_id = self.id,
                workflow = %self.workflow,
                step,
                error = %error,
                "workflow run halted"
            ),
            RunOutcome::Dropped { step } => warn!(
                run_id = self.id,
                workflow = %self.workflow,
                step,
                "workflow runner released before finishing"
            ),
        }

        for callback in callbacks {
            callback(&report);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_signal(&self) -> MutexGuard<'_, FinishSignal> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkflowRunner {
    fn drop(&mut self) {
        let index = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .index;
        self.fire(RunOutcome::Dropped { step: index }, index);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("action panicked: {detail}")
}

/// Handle through which an action reports that its step is done.
///
/// Consumed by [`Continuation::complete`], so a step can complete at most
/// once through it. Dropping it without completing halts the run with
/// [`ActionError::Abandoned`].
pub struct Continuation {
    runner: Option<Arc<WorkflowRunner>>,
    run_id: RunId,
    step: usize,
}

impl Continuation {
    pub(crate) fn new(runner: Arc<WorkflowRunner>, step: usize) -> Self {
        Self {
            run_id: runner.id(),
            runner: Some(runner),
            step,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Index of the step this continuation belongs to.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn complete(mut self, output: Value) {
        if let Some(runner) = self.runner.take() {
            runner.complete(self.step, output);
        }
    }

    /// Complete with no output (`null`).
    pub fn complete_empty(self) {
        self.complete(Value::Null);
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            runner.abandon(self.step);
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("run_id", &self.run_id)
            .field("step", &self.step)
            .field("pending", &self.runner.is_some())
            .finish()
    }
}
