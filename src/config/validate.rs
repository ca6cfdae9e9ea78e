// src/config/validate.rs

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::model::{
    ActionConfig, ConditionConfig, ConfigFile, ConfigSection, RawConfigFile, WorkflowConfig,
};
use crate::engine::{DispatcherOptions, RunnerOptions};
use crate::errors::{Result, SeedflowError};
use crate::types::{parse_duration, EventKind};
use crate::workflow::{
    ActionSpec, Condition, ConditionFilter, ConditionOp, Trigger, WorkflowDefinition,
};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SeedflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_workflows(&raw)?;
        let options = dispatcher_options(&raw.config)?;

        let mut workflows = Vec::new();
        for (name, wf) in raw.workflow.iter() {
            let definition = build_workflow(name, wf)?;
            if !wf.enabled {
                debug!(workflow = %name, "workflow disabled; skipping");
                continue;
            }
            workflows.push(Arc::new(definition));
        }

        if workflows.is_empty() {
            warn!("every workflow in the file is disabled");
        }

        Ok(ConfigFile {
            config: raw.config,
            options,
            workflows,
        })
    }
}

fn ensure_has_workflows(cfg: &RawConfigFile) -> Result<()> {
    if cfg.workflow.is_empty() {
        return Err(SeedflowError::ConfigError(
            "config must contain at least one [workflow.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn dispatcher_options(cfg: &ConfigSection) -> Result<DispatcherOptions> {
    if cfg.max_active_runners == Some(0) {
        return Err(SeedflowError::ConfigError(
            "[config].max_active_runners must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.pending_queue_length == 0 {
        return Err(SeedflowError::ConfigError(
            "[config].pending_queue_length must be >= 1 (got 0)".to_string(),
        ));
    }

    let action_timeout = cfg
        .action_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| SeedflowError::ConfigError(format!("[config].action_timeout: {e}")))?;

    Ok(DispatcherOptions {
        max_active_runners: cfg.max_active_runners,
        pending_queue_length: cfg.pending_queue_length,
        overflow: cfg.overflow_behaviour,
        runner: RunnerOptions { action_timeout },
    })
}

/// Validate one workflow section and turn it into a definition.
///
/// Builder names are not checked here: they are resolved when
/// the step runs.
fn build_workflow(name: &str, wf: &WorkflowConfig) -> Result<WorkflowDefinition> {
    let kinds = wf.on.to_vec();
    if kinds.is_empty() {
        return Err(SeedflowError::ConfigError(format!(
            "workflow '{name}' has an empty `on` list"
        )));
    }
    let kinds = kinds
        .into_iter()
        .map(|k| {
            k.parse::<EventKind>()
                .map_err(|_| SeedflowError::UnknownEventKind(format!("{k} (in workflow '{name}')")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut builder = WorkflowDefinition::builder(name, Trigger::any_of(kinds));

    if !wf.filter.is_empty() {
        let conditions = wf
            .filter
            .iter()
            .map(|c| build_condition(name, c))
            .collect::<Result<Vec<_>>>()?;
        builder = builder.filter(ConditionFilter::new(conditions));
    }

    for (index, action) in wf.actions.iter().enumerate() {
        builder = builder.action(build_action(name, index, action)?);
    }

    Ok(builder.build())
}

fn build_condition(workflow: &str, c: &ConditionConfig) -> Result<Condition> {
    let err = |msg: String| {
        SeedflowError::ConfigError(format!(
            "workflow '{workflow}': filter on '{}' {msg}",
            c.field
        ))
    };

    if c.field.trim().is_empty() {
        return Err(SeedflowError::ConfigError(format!(
            "workflow '{workflow}': filter condition with an empty `field`"
        )));
    }

    let operators = [
        c.equals.is_some(),
        c.not_equals.is_some(),
        c.glob.is_some(),
        c.regex.is_some(),
        c.gt.is_some(),
        c.lt.is_some(),
        c.contains.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if operators != 1 {
        return Err(err(format!(
            "must have exactly one operator (equals, not_equals, glob, regex, gt, lt, contains); found {operators}"
        )));
    }

    let field = c.field.as_str();
    let condition = if let Some(v) = &c.equals {
        Condition::new(field, ConditionOp::Equals(to_json(v)?))
    } else if let Some(v) = &c.not_equals {
        Condition::new(field, ConditionOp::NotEquals(to_json(v)?))
    } else if let Some(pattern) = &c.glob {
        Condition::glob(field, pattern).map_err(|e| err(format!("{e:#}")))?
    } else if let Some(pattern) = &c.regex {
        Condition::regex(field, pattern).map_err(|e| err(format!("{e:#}")))?
    } else if let Some(limit) = c.gt {
        Condition::new(field, ConditionOp::GreaterThan(limit))
    } else if let Some(limit) = c.lt {
        Condition::new(field, ConditionOp::LessThan(limit))
    } else if let Some(needle) = &c.contains {
        Condition::new(field, ConditionOp::Contains(needle.clone()))
    } else {
        return Err(err("has no operator".to_string()));
    };

    Ok(condition)
}

fn build_action(workflow: &str, index: usize, action: &ActionConfig) -> Result<ActionSpec> {
    let builder = action.uses.trim();
    if builder.is_empty() {
        return Err(SeedflowError::ConfigError(format!(
            "workflow '{workflow}': action {index} has an empty `use`"
        )));
    }
    let params = serde_json::to_value(&action.params)?;
    Ok(ActionSpec::builtin(builder, params))
}

fn to_json(value: &toml::Value) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
