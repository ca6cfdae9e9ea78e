// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::session::{EventBus, SessionEvent, Subscription};

use super::dispatcher::TriggerDispatcher;
use super::{RunOutcome, RunReport, RuntimeEvent, RuntimeOptions};

/// Counters collected while the runtime loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub events: usize,
    /// Runs created for matching events, including ones later dropped
    /// from the pending queue.
    pub runs_matched: usize,
    pub runs_completed: usize,
    pub runs_halted: usize,
    pub runs_dropped: usize,
}

impl RuntimeStats {
    fn record(&mut self, report: &RunReport) {
        match report.outcome {
            RunOutcome::Completed => self.runs_completed += 1,
            RunOutcome::Halted { .. } => self.runs_halted += 1,
            RunOutcome::Dropped { .. } => self.runs_dropped += 1,
        }
    }
}

/// Async shell around the [`TriggerDispatcher`].
///
/// Owns the dispatcher and feeds it from two sources:
/// - the event bus, subscribed to the kinds the loaded workflows react to;
/// - the control channel, carrying finished runs, reloads, end of the event
///   source and shutdown requests.
///
/// The dispatcher never awaits a runner, so a slow workflow cannot hold up
/// event delivery.
pub struct Runtime {
    dispatcher: TriggerDispatcher,
    control_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    bus: EventBus,
    events: Subscription,
    options: RuntimeOptions,
    source_closed: bool,
    stats: RuntimeStats,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("dispatcher", &self.dispatcher)
            .field("options", &self.options)
            .field("source_closed", &self.source_closed)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Subscribes to the bus right away, so events published after this
    /// returns are not missed even if `run` has not been polled yet.
    pub fn new(
        dispatcher: TriggerDispatcher,
        control_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        bus: EventBus,
        options: RuntimeOptions,
    ) -> Self {
        let events = bus.subscribe(dispatcher.subscribed_kinds());
        Self {
            dispatcher,
            control_rx,
            bus,
            events,
            options,
            source_closed: false,
            stats: RuntimeStats::default(),
        }
    }

    /// Main event loop. Returns once shutdown is requested, the control
    /// channel closes, or (with `exit_when_idle`) the event source is done
    /// and nothing is left running.
    pub async fn run(mut self) -> Result<RuntimeStats> {
        info!(
            workflows = self.dispatcher.workflows().len(),
            kinds = ?self.dispatcher.subscribed_kinds(),
            "seedflow runtime started"
        );

        loop {
            if self.options.exit_when_idle && self.source_closed && self.drain_and_check_idle() {
                info!("event source closed and no runs left; stopping runtime");
                break;
            }

            // Control first: finished runs free their slots and shutdown is
            // seen even while the bus is busy.
            tokio::select! {
                biased;

                control = self.control_rx.recv() => {
                    let Some(control) = control else {
                        info!("runtime control channel closed; exiting");
                        break;
                    };
                    if !self.handle_control(control) {
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    self.dispatch(&event);
                }
            }
        }

        self.dispatcher.shutdown();
        info!(stats = ?self.stats, "runtime exiting");
        Ok(self.stats)
    }

    fn dispatch(&mut self, event: &SessionEvent) {
        self.stats.events += 1;
        debug!(event = %event.kind(), "runtime received event");
        let matched = self.dispatcher.dispatch(event);
        self.stats.runs_matched += matched.len();
    }

    /// Returns false when the loop should stop.
    fn handle_control(&mut self, control: RuntimeEvent) -> bool {
        match control {
            RuntimeEvent::RunFinished(report) => {
                self.stats.record(&report);
                self.dispatcher.handle_finished(&report);
            }
            RuntimeEvent::Reload(config) => {
                // Events already delivered go to the workflows they were
                // published under.
                while let Some(event) = self.events.try_recv() {
                    self.dispatch(&event);
                }
                self.dispatcher.reconfigure(config.workflows, config.options);
                self.events = self.bus.subscribe(self.dispatcher.subscribed_kinds());
                info!(kinds = ?self.dispatcher.subscribed_kinds(), "workflows reloaded");
            }
            RuntimeEvent::EventSourceClosed => {
                debug!("event source closed");
                self.source_closed = true;
            }
            RuntimeEvent::ShutdownRequested => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }

    /// Dispatch whatever is already queued on the bus, then report whether
    /// the dispatcher has nothing active or pending.
    fn drain_and_check_idle(&mut self) -> bool {
        while let Some(event) = self.events.try_recv() {
            self.dispatch(&event);
        }
        self.dispatcher.is_idle()
    }
}
