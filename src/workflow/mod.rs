// src/workflow/mod.rs

//! Workflow data model.
//!
//! - [`definition`] holds the immutable `WorkflowDefinition`, its `Trigger`
//!   and the `ActionSpec` steps.
//! - [`filter`] defines the filter interface and the declarative
//!   condition filter used by workflow files.
//! - [`context`] is the per-run `ExecutionContext`.

pub mod context;
pub mod definition;
pub mod filter;

pub use context::ExecutionContext;
pub use definition::{ActionSpec, Callable, Trigger, WorkflowBuilder, WorkflowDefinition};
pub use filter::{Condition, ConditionFilter, ConditionOp, Filter};
