// src/workflow/context.rs

use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::session::SessionEvent;

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("template regex is valid")
});

/// State scoped to one workflow run.
///
/// `env` is seeded from the triggering event's payload. `actions` is the
/// append-only list of action outputs, in execution order: action `k` sees
/// the outputs of actions `0..k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    env: Map<String, Value>,
    actions: Vec<Value>,
}

impl ExecutionContext {
    pub fn new(env: Map<String, Value>) -> Self {
        Self {
            env,
            actions: Vec::new(),
        }
    }

    pub fn from_event(event: &SessionEvent) -> Self {
        Self::new(event.payload())
    }

    pub fn env(&self) -> &Map<String, Value> {
        &self.env
    }

    pub fn actions(&self) -> &[Value] {
        &self.actions
    }

    pub(crate) fn push_output(&mut self, output: Value) {
        self.actions.push(output);
    }

    /// Resolve a dotted path such as `torrent.name` or `actions.0.ok`.
    ///
    /// Numeric segments index into arrays. The leading `actions` segment
    /// refers to the accumulated action outputs.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;

        let mut current = if first == "actions" {
            match segments.next() {
                Some(idx) => self.actions.get(idx.parse::<usize>().ok()?)?,
                None => return None,
            }
        } else {
            self.env.get(first)?
        };

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current)
    }

    /// The whole context as one JSON object (`env` plus `actions`).
    pub fn to_value(&self) -> Value {
        let mut map = self.env.clone();
        map.insert("actions".into(), Value::Array(self.actions.clone()));
        Value::Object(map)
    }

    /// Replace `{{path}}` placeholders with values from the context.
    ///
    /// Strings are inserted verbatim, other values as JSON. A placeholder
    /// whose path does not resolve is an error.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut missing = None;
        let rendered = TEMPLATE_RE.replace_all(template, |caps: &Captures<'_>| {
            let path = &caps[1];
            match self.lookup(path) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    missing.get_or_insert_with(|| path.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(path) => Err(anyhow!("template references unknown field '{path}'")),
            None => Ok(rendered.into_owned()),
        }
    }
}
