// src/workflow/filter.rs

//! Filters: the optional second gate of a workflow, evaluated against a
//! read-only context built from the triggering event.

use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use serde_json::Value;

use super::ExecutionContext;

/// Predicate over an execution context.
///
/// An `Err` is treated by the dispatcher as "no match" and logged.
pub trait Filter: Send + Sync {
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool>;

    /// Short human-readable summary, used by `--dry-run`.
    fn describe(&self) -> String {
        "custom filter".to_string()
    }
}

impl<F> Filter for F
where
    F: Fn(&ExecutionContext) -> Result<bool> + Send + Sync,
{
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        self(ctx)
    }
}

/// Comparison applied to one context field.
#[derive(Debug, Clone)]
pub enum ConditionOp {
    Equals(Value),
    NotEquals(Value),
    Glob(GlobMatcher),
    Regex(Regex),
    GreaterThan(f64),
    LessThan(f64),
    /// Substring for strings, membership for arrays.
    Contains(String),
}

#[derive(Debug, Clone)]
pub struct Condition {
    field: String,
    op: ConditionOp,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    pub fn glob(field: impl Into<String>, pattern: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .with_context(|| format!("invalid glob pattern '{pattern}'"))?
            .compile_matcher();
        Ok(Self::new(field, ConditionOp::Glob(matcher)))
    }

    pub fn regex(field: impl Into<String>, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("invalid regex '{pattern}'"))?;
        Ok(Self::new(field, ConditionOp::Regex(re)))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        let value = ctx
            .lookup(&self.field)
            .ok_or_else(|| anyhow!("field '{}' not present in context", self.field))?;

        let matched = match &self.op {
            ConditionOp::Equals(expected) => value == expected,
            ConditionOp::NotEquals(expected) => value != expected,
            ConditionOp::Glob(matcher) => matcher.is_match(as_str(&self.field, value)?),
            ConditionOp::Regex(re) => re.is_match(as_str(&self.field, value)?),
            ConditionOp::GreaterThan(limit) => as_f64(&self.field, value)? > *limit,
            ConditionOp::LessThan(limit) => as_f64(&self.field, value)? < *limit,
            ConditionOp::Contains(needle) => match value {
                Value::String(s) => s.contains(needle.as_str()),
                Value::Array(items) => items.iter().any(|v| v.as_str() == Some(needle.as_str())),
                _ => bail!("field '{}' is neither a string nor an array", self.field),
            },
        };
        Ok(matched)
    }
}

fn as_str<'a>(field: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("field '{field}' is not a string"))
}

fn as_f64(field: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| anyhow!("field '{field}' is not a number"))
}

/// Declarative filter: passes when every condition holds.
#[derive(Debug, Clone, Default)]
pub struct ConditionFilter {
    conditions: Vec<Condition>,
}

impl ConditionFilter {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

impl Filter for ConditionFilter {
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        for condition in &self.conditions {
            if !condition.evaluate(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConditionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.conditions.iter().map(|c| c.field()).collect();
        write!(f, "conditions on [{}]", fields.join(", "))
    }
}
