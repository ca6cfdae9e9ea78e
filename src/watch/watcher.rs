// src/watch/watcher.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{parse_str, ConfigFile};
use crate::engine::RuntimeEvent;
use crate::watch::hash::{compute_file_hash, content_hash};

/// Handle for the workflow file watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive. Dropping this handle
/// stops watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Outcome of looking at the workflow file after a change notification.
#[derive(Debug)]
pub enum ReloadCheck {
    /// Same content as last time (or the file is gone).
    Unchanged,
    Reloaded(ConfigFile),
    /// New content that failed to parse or validate; the caller keeps the
    /// workflows it has.
    Invalid(String),
}

/// Tracks the last seen content of the workflow file.
#[derive(Debug)]
pub struct ReloadTracker {
    path: PathBuf,
    last_hash: Option<String>,
}

impl ReloadTracker {
    /// Start tracking `path`, treating its current content as already loaded.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_hash = compute_file_hash(&path).ok();
        Self { path, last_hash }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn check(&mut self) -> ReloadCheck {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                // Editors often remove and recreate the file on save.
                debug!(path = ?self.path, error = %err, "workflow file not readable");
                return ReloadCheck::Unchanged;
            }
        };

        let hash = content_hash(&bytes);
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            debug!(path = ?self.path, "workflow file content unchanged; ignoring");
            return ReloadCheck::Unchanged;
        }
        self.last_hash = Some(hash);

        let parsed = String::from_utf8(bytes)
            .context("workflow file is not valid UTF-8")
            .map_err(|e| format!("{e:#}"))
            .and_then(|contents| parse_str(&contents).map_err(|e| e.to_string()));

        match parsed {
            Ok(cfg) => ReloadCheck::Reloaded(cfg),
            Err(err) => ReloadCheck::Invalid(err),
        }
    }
}

/// Watch the workflow file at `path` and send `RuntimeEvent::Reload` when
/// its content changes to a valid file.
///
/// The parent directory is watched (non-recursively) so replacing the file
/// on save is noticed too.
pub fn spawn_config_watcher(
    path: impl Into<PathBuf>,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let path = path.into();
    // Canonicalize once so we have a stable path.
    let path = path.canonicalize().unwrap_or_else(|_| path.clone());
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|n| n.to_os_string());

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    // We can't log via tracing here easily, so fallback to stderr.
                    eprintln!("seedflow: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("seedflow: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!("watching workflow file {:?}", path);

    let mut tracker = ReloadTracker::new(path);

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if matches!(event.kind, NotifyKind::Access(_)) {
                continue;
            }
            let touches_file = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_file {
                continue;
            }

            debug!(?event, "workflow file event");
            match tracker.check() {
                ReloadCheck::Unchanged => {}
                ReloadCheck::Reloaded(cfg) => {
                    info!(
                        path = ?tracker.path(),
                        workflows = cfg.workflows.len(),
                        "workflow file changed; reloading"
                    );
                    if runtime_tx.send(RuntimeEvent::Reload(cfg)).is_err() {
                        debug!("runtime gone; stopping workflow file watcher");
                        break;
                    }
                }
                ReloadCheck::Invalid(err) => {
                    warn!(
                        path = ?tracker.path(),
                        error = %err,
                        "workflow file is invalid; keeping the current workflows"
                    );
                }
            }
        }
        debug!("workflow file watcher finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}
