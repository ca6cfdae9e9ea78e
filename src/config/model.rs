// src/config/model.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::engine::DispatcherOptions;
use crate::types::OverflowBehaviour;
use crate::workflow::WorkflowDefinition;

/// Workflow file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// max_active_runners = 8
/// overflow_behaviour = "queue"
///
/// [workflow.announce]
/// on = ["torrent_added", "torrent_finished"]
/// filter = [ { field = "torrent.category", equals = "tv" } ]
/// actions = [ { use = "log", message = "{{event}}: {{torrent.name}}" } ]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All workflows from `[workflow.<name>]`, keyed by name.
    #[serde(default)]
    pub workflow: BTreeMap<String, WorkflowConfig>,
}

/// Validated workflow file, ready for the dispatcher.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub options: DispatcherOptions,
    /// Enabled workflows in name order.
    pub workflows: Vec<Arc<WorkflowDefinition>>,
}

/// `[config]` section: dispatcher limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Cap on simultaneously running workflow runs. Unbounded when absent.
    #[serde(default)]
    pub max_active_runners: Option<usize>,

    /// Runs remembered while at the cap.
    #[serde(default = "default_pending_queue_length")]
    pub pending_queue_length: usize,

    /// `"queue"` (drop the newest run) or `"cancel"` (drop the oldest
    /// pending run) when the pending queue is full.
    #[serde(default)]
    pub overflow_behaviour: OverflowBehaviour,

    /// Per-action deadline such as `"30s"`.
    #[serde(default)]
    pub action_timeout: Option<String>,
}

fn default_pending_queue_length() -> usize {
    64
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_active_runners: None,
            pending_queue_length: default_pending_queue_length(),
            overflow_behaviour: OverflowBehaviour::default(),
            action_timeout: None,
        }
    }
}

/// A single event kind or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(s) => vec![s.as_str()],
            OneOrMany::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// `[workflow.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Event kinds that trigger this workflow.
    pub on: OneOrMany,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// All conditions must hold for the workflow to run.
    #[serde(default)]
    pub filter: Vec<ConditionConfig>,

    /// Steps, in order.
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

fn default_enabled() -> bool {
    true
}

/// One filter condition: a context field and exactly one operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionConfig {
    pub field: String,
    #[serde(default)]
    pub equals: Option<toml::Value>,
    #[serde(default)]
    pub not_equals: Option<toml::Value>,
    #[serde(default)]
    pub glob: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub gt: Option<f64>,
    #[serde(default)]
    pub lt: Option<f64>,
    #[serde(default)]
    pub contains: Option<String>,
}

/// One step: `use` names the action builder, every other key is a
/// parameter handed to it.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "use")]
    pub uses: String,

    #[serde(flatten)]
    pub params: toml::Table,
}
