// src/actions/builtin.rs

//! Builtin actions that complete synchronously (plus `sleep`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::{params, Action, ActionBuilder, ActionResources, BuilderRegistry};
use crate::engine::Continuation;
use crate::session::{InfoHash, Session};
use crate::types::parse_duration;
use crate::workflow::ExecutionContext;

pub(crate) fn register_builtins(registry: &mut BuilderRegistry) {
    registry.register("log", LogBuilder);
    registry.register("pause_torrent", TorrentOpBuilder(TorrentOp::Pause));
    registry.register("resume_torrent", TorrentOpBuilder(TorrentOp::Resume));
    registry.register("recheck_torrent", TorrentOpBuilder(TorrentOp::Recheck));
    registry.register("remove_torrent", TorrentOpBuilder(TorrentOp::Remove));
    registry.register("pause_session", SessionOpBuilder { pause: true });
    registry.register("resume_session", SessionOpBuilder { pause: false });
    registry.register("apply_settings", ApplySettingsBuilder);
    registry.register("sleep", SleepBuilder);
}

/// Resolve the torrent a step acts on: the `info_hash` parameter (which may
/// be a template) or the info hash of the triggering event.
pub(crate) fn target_hash(template: Option<&str>, ctx: &ExecutionContext) -> Result<InfoHash> {
    if let Some(template) = template {
        return Ok(InfoHash::new(ctx.render(template)?));
    }

    ctx.lookup("torrent.info_hash")
        .or_else(|| ctx.lookup("info_hash"))
        .and_then(Value::as_str)
        .map(InfoHash::new)
        .ok_or_else(|| anyhow!("event carries no info hash and no 'info_hash' parameter was given"))
}

// ---------------------------------------------------------------------------
// log

#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

struct LogBuilder;

impl ActionBuilder for LogBuilder {
    fn build(&self, params: &Value, _resources: &ActionResources) -> Result<Box<dyn Action>> {
        let message = params::str(params, "message")?.to_string();
        let level = match params::opt_str(params, "level")?.map(str::to_lowercase).as_deref() {
            None | Some("info") => LogLevel::Info,
            Some("error") => LogLevel::Error,
            Some("warn") | Some("warning") => LogLevel::Warn,
            Some("debug") => LogLevel::Debug,
            Some(other) => bail!("unsupported log level '{other}'"),
        };
        Ok(Box::new(LogAction { message, level }))
    }
}

struct LogAction {
    message: String,
    level: LogLevel,
}

impl Action for LogAction {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let message = ctx.render(&self.message)?;
        match self.level {
            LogLevel::Error => error!(target: "seedflow::workflow", "{message}"),
            LogLevel::Warn => warn!(target: "seedflow::workflow", "{message}"),
            LogLevel::Info => info!(target: "seedflow::workflow", "{message}"),
            LogLevel::Debug => debug!(target: "seedflow::workflow", "{message}"),
        }
        done.complete(json!({ "message": message }));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// per-torrent operations

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TorrentOp {
    Pause,
    Resume,
    Recheck,
    Remove,
}

struct TorrentOpBuilder(TorrentOp);

impl ActionBuilder for TorrentOpBuilder {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        let remove_data = match self.0 {
            TorrentOp::Remove => params::bool_or(params, "remove_data", false)?,
            _ => false,
        };
        Ok(Box::new(TorrentOpAction {
            op: self.0,
            info_hash: params::opt_str(params, "info_hash")?.map(str::to_string),
            remove_data,
            session: Arc::clone(&resources.session),
        }))
    }
}

struct TorrentOpAction {
    op: TorrentOp,
    info_hash: Option<String>,
    remove_data: bool,
    session: Arc<dyn Session>,
}

impl Action for TorrentOpAction {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let hash = target_hash(self.info_hash.as_deref(), ctx)?;
        match self.op {
            TorrentOp::Pause => self.session.pause_torrent(&hash)?,
            TorrentOp::Resume => self.session.resume_torrent(&hash)?,
            TorrentOp::Recheck => self.session.recheck_torrent(&hash)?,
            TorrentOp::Remove => self.session.remove_torrent(&hash, self.remove_data)?,
        }
        debug!(op = ?self.op, info_hash = %hash, "torrent operation requested");
        done.complete(json!({ "info_hash": hash }));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// session-wide pause / resume

struct SessionOpBuilder {
    pause: bool,
}

impl ActionBuilder for SessionOpBuilder {
    fn build(&self, _params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        Ok(Box::new(SessionOpAction {
            pause: self.pause,
            session: Arc::clone(&resources.session),
        }))
    }
}

struct SessionOpAction {
    pause: bool,
    session: Arc<dyn Session>,
}

impl Action for SessionOpAction {
    fn invoke(self: Box<Self>, _ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        if self.pause {
            self.session.pause()?;
        } else {
            self.session.resume()?;
        }
        done.complete(json!({ "paused": self.pause }));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// apply_settings

struct ApplySettingsBuilder;

impl ActionBuilder for ApplySettingsBuilder {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        let settings = match params.get("settings") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => bail!("parameter 'settings' must be a table"),
            None => bail!("missing required parameter 'settings'"),
        };
        Ok(Box::new(ApplySettingsAction {
            settings,
            session: Arc::clone(&resources.session),
        }))
    }
}

struct ApplySettingsAction {
    settings: Map<String, Value>,
    session: Arc<dyn Session>,
}

impl Action for ApplySettingsAction {
    fn invoke(self: Box<Self>, _ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        self.session.apply_settings(&self.settings)?;
        let keys: Vec<&String> = self.settings.keys().collect();
        done.complete(json!({ "applied": keys }));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// sleep

struct SleepBuilder;

impl ActionBuilder for SleepBuilder {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        let duration = parse_duration(params::str(params, "duration")?).map_err(|e| anyhow!(e))?;
        Ok(Box::new(SleepAction {
            duration,
            io: resources.io.clone(),
        }))
    }
}

struct SleepAction {
    duration: Duration,
    io: Handle,
}

impl Action for SleepAction {
    fn invoke(self: Box<Self>, _ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let duration = self.duration;
        self.io.spawn(async move {
            tokio::time::sleep(duration).await;
            done.complete_empty();
        });
        Ok(())
    }
}
