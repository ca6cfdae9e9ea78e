// src/actions/exec.rs

//! `exec`: run a shell command as a workflow step.
//!
//! The command line is a template rendered against the run's context. A few
//! well-known fields are also exported as `SEEDFLOW_*` environment
//! variables. The step completes with the exit code and captured stdout; a
//! command that cannot be spawned completes with `success = false` and the
//! error, so the run never hangs on it.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use super::{params, Action, ActionBuilder, ActionResources};
use crate::engine::Continuation;
use crate::workflow::ExecutionContext;

/// Context fields exported to the child process.
const EXPORTED_FIELDS: [(&str, &str); 5] = [
    ("SEEDFLOW_EVENT", "event"),
    ("SEEDFLOW_INFO_HASH", "torrent.info_hash"),
    ("SEEDFLOW_NAME", "torrent.name"),
    ("SEEDFLOW_SAVE_PATH", "torrent.save_path"),
    ("SEEDFLOW_CATEGORY", "torrent.category"),
];

pub struct ExecBuilder;

impl ActionBuilder for ExecBuilder {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        Ok(Box::new(ExecAction {
            cmd: params::str(params, "cmd")?.to_string(),
            io: resources.io.clone(),
        }))
    }
}

struct ExecAction {
    cmd: String,
    io: Handle,
}

impl Action for ExecAction {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let cmd = ctx.render(&self.cmd)?;
        let env = exported_env(ctx);

        self.io.spawn(async move {
            let output = match run_command(&cmd, &env).await {
                Ok(output) => output,
                Err(err) => {
                    error!(cmd = %cmd, error = %format!("{err:#}"), "command execution error");
                    json!({ "success": false, "error": format!("{err:#}") })
                }
            };
            done.complete(output);
        });

        Ok(())
    }
}

fn exported_env(ctx: &ExecutionContext) -> Vec<(&'static str, String)> {
    EXPORTED_FIELDS
        .iter()
        .filter_map(|(var, path)| {
            let value = match ctx.lookup(path)? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((*var, value))
        })
        .collect()
}

async fn run_command(cmd_line: &str, env: &[(&'static str, String)]) -> Result<Value> {
    info!(cmd = %cmd_line, "starting command");

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for command '{cmd_line}'"))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stderr: {}", line);
            }
        });
    }

    let mut stdout_lines = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("reading stdout of '{cmd_line}'"))?
        {
            debug!("stdout: {}", line);
            stdout_lines.push(line);
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of command '{cmd_line}'"))?;
    let code = status.code().unwrap_or(-1);

    info!(
        cmd = %cmd_line,
        exit_code = code,
        success = status.success(),
        "command exited"
    );

    Ok(json!({
        "exit_code": code,
        "success": status.success(),
        "stdout": stdout_lines.join("\n"),
    }))
}
