// src/workflow/definition.rs

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use super::{ExecutionContext, Filter};
use crate::types::EventKind;

/// Externally supplied unit of behaviour, run as one workflow step.
///
/// The returned value becomes the step's output.
pub trait Callable: Send + Sync {
    fn call(&self, ctx: &ExecutionContext) -> Result<Value>;
}

impl<F> Callable for F
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync,
{
    fn call(&self, ctx: &ExecutionContext) -> Result<Value> {
        self(ctx)
    }
}

/// Set of event kinds a workflow reacts to. Matching is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    kinds: BTreeSet<EventKind>,
}

impl Trigger {
    pub fn on(kind: EventKind) -> Self {
        Self::any_of([kind])
    }

    pub fn any_of(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// One step of a workflow.
#[derive(Clone)]
pub enum ActionSpec {
    /// Built by the named builder at invocation time.
    Builtin { builder: String, params: Value },
    /// Opaque function, adapted to the same invocation contract.
    Callable(Arc<dyn Callable>),
}

impl ActionSpec {
    pub fn builtin(builder: impl Into<String>, params: Value) -> Self {
        ActionSpec::Builtin {
            builder: builder.into(),
            params,
        }
    }

    pub fn callable<C: Callable + 'static>(callable: C) -> Self {
        ActionSpec::Callable(Arc::new(callable))
    }

    /// Short human-readable label for logs.
    pub fn label(&self) -> &str {
        match self {
            ActionSpec::Builtin { builder, .. } => builder,
            ActionSpec::Callable(_) => "<callable>",
        }
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSpec::Builtin { builder, params } => f
                .debug_struct("Builtin")
                .field("builder", builder)
                .field("params", params)
                .finish(),
            ActionSpec::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// "On trigger, if filter passes, run actions in order."
///
/// Immutable once built. The action list is shared by reference with every
/// runner spawned from this definition, so a run keeps the sequence it
/// started with even if the workflows are reloaded meanwhile.
#[derive(Clone)]
pub struct WorkflowDefinition {
    name: String,
    trigger: Trigger,
    filter: Option<Arc<dyn Filter>>,
    actions: Arc<[ActionSpec]>,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>, trigger: Trigger) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            trigger,
            filter: None,
            actions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn filter(&self) -> Option<&Arc<dyn Filter>> {
        self.filter.as_ref()
    }

    pub fn actions(&self) -> &Arc<[ActionSpec]> {
        &self.actions
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("filter", &self.filter.as_ref().map(|_| ".."))
            .field("actions", &self.actions)
            .finish()
    }
}

pub struct WorkflowBuilder {
    name: String,
    trigger: Trigger,
    filter: Option<Arc<dyn Filter>>,
    actions: Vec<ActionSpec>,
}

impl WorkflowBuilder {
    pub fn filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn action(mut self, spec: ActionSpec) -> Self {
        self.actions.push(spec);
        self
    }

    pub fn builtin(self, builder: impl Into<String>, params: Value) -> Self {
        self.action(ActionSpec::builtin(builder, params))
    }

    pub fn call<C: Callable + 'static>(self, callable: C) -> Self {
        self.action(ActionSpec::callable(callable))
    }

    pub fn build(self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name,
            trigger: self.trigger,
            filter: self.filter,
            actions: self.actions.into(),
        }
    }
}
