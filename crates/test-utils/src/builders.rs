#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use seedflow::actions::{ActionResources, BuilderRegistry};
use seedflow::engine::{
    DispatcherOptions, RunReport, RunnerOptions, RuntimeEvent, TriggerDispatcher, WorkflowRunner,
};
use seedflow::session::{EventBus, MemorySession, SessionEvent, TorrentStatus};
use seedflow::workflow::{ExecutionContext, WorkflowDefinition};

pub fn torrent(hash: &str, name: &str) -> TorrentStatus {
    TorrentStatus::new(hash, name)
}

pub fn finished(hash: &str, name: &str) -> SessionEvent {
    SessionEvent::TorrentFinished {
        torrent: torrent(hash, name),
    }
}

pub fn added(hash: &str, name: &str) -> SessionEvent {
    SessionEvent::TorrentAdded {
        torrent: torrent(hash, name),
    }
}

/// Bus, in-memory session and action resources bound to the current tokio
/// runtime. Must be created from inside a runtime.
pub struct Harness {
    pub bus: EventBus,
    pub session: Arc<MemorySession>,
    pub resources: ActionResources,
}

impl Harness {
    pub fn new() -> Self {
        let bus = EventBus::new();
        let session = Arc::new(MemorySession::new(bus.clone()));
        let resources = ActionResources {
            io: tokio::runtime::Handle::current(),
            session: session.clone(),
            bus: bus.clone(),
        };
        Self {
            bus,
            session,
            resources,
        }
    }

    /// A runner for `definition` seeded from `event`, not yet started.
    pub fn runner(
        &self,
        definition: &WorkflowDefinition,
        event: &SessionEvent,
        registry: BuilderRegistry,
        options: RunnerOptions,
    ) -> Arc<WorkflowRunner> {
        WorkflowRunner::new(
            1,
            definition,
            ExecutionContext::from_event(event),
            Arc::new(registry),
            self.resources.clone(),
            options,
        )
    }

    /// A dispatcher plus the receiving end of its control channel.
    pub fn dispatcher(
        &self,
        workflows: Vec<WorkflowDefinition>,
        registry: BuilderRegistry,
        options: DispatcherOptions,
    ) -> (TriggerDispatcher, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = TriggerDispatcher::new(
            workflows.into_iter().map(Arc::new).collect(),
            Arc::new(registry),
            self.resources.clone(),
            options,
            tx,
        );
        (dispatcher, rx)
    }
}

/// Feed finished-run reports back into `dispatcher` until it is idle.
/// Returns every report seen, in arrival order.
pub async fn drive_until_idle(
    dispatcher: &mut TriggerDispatcher,
    rx: &mut mpsc::UnboundedReceiver<RuntimeEvent>,
) -> Vec<RunReport> {
    let mut reports = Vec::new();
    while !dispatcher.is_idle() {
        match rx.recv().await {
            Some(RuntimeEvent::RunFinished(report)) => {
                dispatcher.handle_finished(&report);
                reports.push(report);
            }
            Some(_) => {}
            None => break,
        }
    }
    // Reports of runs dropped from the queue may still be in flight.
    while let Ok(RuntimeEvent::RunFinished(report)) = rx.try_recv() {
        reports.push(report);
    }
    reports
}
