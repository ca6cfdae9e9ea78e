// src/actions/function.rs

use std::sync::Arc;

use anyhow::Result;

use super::Action;
use crate::engine::Continuation;
use crate::workflow::{Callable, ExecutionContext};

/// One-shot wrapper that runs an opaque callable as a workflow step.
///
/// The callable runs synchronously inside `invoke`; its return value is the
/// step output. An error from the callable halts the run.
pub struct FunctionAction {
    callable: Arc<dyn Callable>,
}

impl FunctionAction {
    pub fn new(callable: Arc<dyn Callable>) -> Box<dyn Action> {
        Box::new(Self { callable })
    }
}

impl Action for FunctionAction {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let output = self.callable.call(ctx)?;
        done.complete(output);
        Ok(())
    }
}
