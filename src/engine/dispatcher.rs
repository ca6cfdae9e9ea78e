// src/engine/dispatcher.rs

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::admission::{Admission, Admit};
use super::runner::WorkflowRunner;
use super::{RunId, RunReport, RunnerOptions, RuntimeEvent};
use crate::actions::{ActionResources, BuilderRegistry};
use crate::session::SessionEvent;
use crate::types::{EventKind, OverflowBehaviour};
use crate::workflow::{ExecutionContext, WorkflowDefinition};

/// Limits applied by the dispatcher to the runners it spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Cap on simultaneously running runners. `None` is unbounded.
    pub max_active_runners: Option<usize>,
    /// How many runs may wait while at the cap.
    pub pending_queue_length: usize,
    pub overflow: OverflowBehaviour,
    pub runner: RunnerOptions,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_active_runners: None,
            pending_queue_length: 64,
            overflow: OverflowBehaviour::default(),
            runner: RunnerOptions::default(),
        }
    }
}

/// Matches session events against the loaded workflows and spawns one
/// runner per match.
///
/// Spawning is fire-and-forget: `dispatch` returns as soon as the matching
/// runners are started (or queued), without waiting on any of them. Each
/// runner reports back through `RuntimeEvent::RunFinished` on the channel
/// given at construction; the owner feeds those reports to
/// [`TriggerDispatcher::handle_finished`] so the dispatcher can release the
/// runner and admit the next pending one.
pub struct TriggerDispatcher {
    workflows: Vec<Arc<WorkflowDefinition>>,
    registry: Arc<BuilderRegistry>,
    resources: ActionResources,
    options: DispatcherOptions,
    admission: Admission<Arc<WorkflowRunner>>,
    active: HashMap<RunId, Arc<WorkflowRunner>>,
    next_run_id: RunId,
    finished_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("workflows", &self.workflows.len())
            .field("active", &self.active.len())
            .field("pending", &self.admission.pending_len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TriggerDispatcher {
    pub fn new(
        workflows: Vec<Arc<WorkflowDefinition>>,
        registry: Arc<BuilderRegistry>,
        resources: ActionResources,
        options: DispatcherOptions,
        finished_tx: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        Self {
            workflows,
            registry,
            resources,
            options,
            admission: Admission::new(
                options.max_active_runners,
                options.pending_queue_length,
                options.overflow,
            ),
            active: HashMap::new(),
            next_run_id: 1,
            finished_tx,
        }
    }

    pub fn workflows(&self) -> &[Arc<WorkflowDefinition>] {
        &self.workflows
    }

    pub fn options(&self) -> DispatcherOptions {
        self.options
    }

    /// Every event kind referenced by a loaded workflow's trigger.
    pub fn subscribed_kinds(&self) -> BTreeSet<EventKind> {
        self.workflows
            .iter()
            .flat_map(|wf| wf.trigger().kinds())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.admission.pending_len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.admission.pending_len() == 0
    }

    /// Swap in a new set of workflows and limits.
    ///
    /// Runners already spawned keep the action list they were created with.
    pub fn reconfigure(&mut self, workflows: Vec<Arc<WorkflowDefinition>>, options: DispatcherOptions) {
        info!(
            workflows = workflows.len(),
            max_active_runners = ?options.max_active_runners,
            "replacing loaded workflows"
        );
        self.workflows = workflows;
        self.options = options;

        let (started, evicted) = self.admission.set_limits(
            options.max_active_runners,
            options.pending_queue_length,
            options.overflow,
        );
        for runner in evicted {
            warn!(
                run_id = runner.id(),
                workflow = %runner.workflow(),
                "dropping queued run: pending queue shrank"
            );
        }
        for runner in started {
            self.activate(runner);
        }
    }

    /// Evaluate `event` against every loaded workflow and spawn a runner for
    /// each match. Returns the ids of the spawned runs, including queued ones.
    pub fn dispatch(&mut self, event: &SessionEvent) -> Vec<RunId> {
        let kind = event.kind();
        let matching: Vec<Arc<WorkflowDefinition>> = self
            .workflows
            .iter()
            .filter(|wf| wf.trigger().matches(kind))
            .cloned()
            .collect();

        if matching.is_empty() {
            trace!(event = %kind, "no workflow triggered by event");
            return Vec::new();
        }

        // Filters only read; runners each get their own fresh context.
        let probe = ExecutionContext::from_event(event);
        let mut spawned = Vec::new();

        for wf in matching {
            if !passes_filter(&wf, &probe) {
                continue;
            }
            let run_id = self.spawn(&wf, ExecutionContext::from_event(event));
            info!(event = %kind, workflow = %wf.name(), run_id, "workflow triggered");
            spawned.push(run_id);
        }

        spawned
    }

    /// Create a runner for `definition` seeded with `context` and start it,
    /// or queue it when at the concurrency cap.
    pub fn spawn(&mut self, definition: &WorkflowDefinition, context: ExecutionContext) -> RunId {
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let runner = WorkflowRunner::new(
            run_id,
            definition,
            context,
            Arc::clone(&self.registry),
            self.resources.clone(),
            self.options.runner,
        );

        let tx = self.finished_tx.clone();
        runner.on_finished(move |report| {
            let _ = tx.send(RuntimeEvent::RunFinished(report.clone()));
        });

        match self.admission.offer(runner) {
            Admit::Start(runner) => self.activate(runner),
            Admit::Queued => debug!(
                run_id,
                workflow = %definition.name(),
                pending = self.admission.pending_len(),
                "run queued at concurrency cap"
            ),
            Admit::Dropped(runner) => warn!(
                run_id = runner.id(),
                workflow = %runner.workflow(),
                "dropping run: pending queue full"
            ),
        }

        run_id
    }

    /// Release a finished runner and start the next queued one, if any.
    ///
    /// Reports for runs that were never active (dropped from the queue) are
    /// accepted and ignored.
    pub fn handle_finished(&mut self, report: &RunReport) {
        if self.active.remove(&report.run_id).is_none() {
            debug!(run_id = report.run_id, workflow = %report.workflow, "finished run was not active");
            return;
        }

        if let Some(next) = self.admission.release() {
            self.activate(next);
        }
    }

    /// Release every runner and discard queued runs.
    ///
    /// Runners with an action in flight stay alive until that action lets
    /// go of its continuation.
    pub fn shutdown(&mut self) {
        let pending = self.admission.drain_pending();
        info!(
            active = self.active.len(),
            pending = pending.len(),
            "dispatcher shutting down"
        );
        drop(pending);
        self.active.clear();
        self.workflows.clear();
    }

    fn activate(&mut self, runner: Arc<WorkflowRunner>) {
        self.active.insert(runner.id(), Arc::clone(&runner));
        runner.start();
    }
}

/// Run the workflow's filter, if any. Errors (and panics) count as no match.
fn passes_filter(wf: &WorkflowDefinition, ctx: &ExecutionContext) -> bool {
    let Some(filter) = wf.filter() else {
        return true;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| filter.evaluate(ctx)))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("filter panicked")));

    match outcome {
        Ok(true) => true,
        Ok(false) => {
            debug!(workflow = %wf.name(), "event filtered out");
            false
        }
        Err(err) => {
            warn!(
                workflow = %wf.name(),
                error = %format!("{err:#}"),
                "filter evaluation failed; treating as no match"
            );
            false
        }
    }
}
