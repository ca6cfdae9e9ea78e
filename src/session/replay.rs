// src/session/replay.rs

//! Replay of recorded session events.
//!
//! Reads one JSON-encoded [`SessionEvent`] per line, keeps the
//! [`MemorySession`] table in sync and publishes each event on the bus.
//! Blank lines and lines starting with `#` are skipped; malformed lines are
//! logged and skipped.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EventBus, MemorySession, SessionEvent};
use crate::engine::RuntimeEvent;

/// Where replayed events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaySource {
    Stdin,
    File(PathBuf),
}

impl ReplaySource {
    /// `-` means stdin, anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            ReplaySource::Stdin
        } else {
            ReplaySource::File(PathBuf::from(arg))
        }
    }
}

/// Spawn the replay task.
///
/// Sends [`RuntimeEvent::EventSourceClosed`] once the source is exhausted
/// (or could not be opened).
pub fn spawn_replay(
    source: ReplaySource,
    session: Arc<MemorySession>,
    bus: EventBus,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let replayed = match &source {
            ReplaySource::Stdin => {
                let reader = BufReader::new(tokio::io::stdin());
                replay_lines(reader, &session, &bus).await
            }
            ReplaySource::File(path) => match tokio::fs::File::open(path).await {
                Ok(file) => replay_lines(BufReader::new(file), &session, &bus).await,
                Err(e) => {
                    warn!(path = ?path, error = %e, "failed to open event file");
                    0
                }
            },
        };

        info!(?source, replayed, "event source exhausted");
        let _ = runtime_tx.send(RuntimeEvent::EventSourceClosed);
    })
}

/// Publish every event read from `reader`; returns how many were published.
pub async fn replay_lines<R>(reader: R, session: &MemorySession, bus: &EventBus) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut replayed = 0;
    let mut line_no = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error reading event source");
                break;
            }
        };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<SessionEvent>(trimmed) {
            Ok(event) => {
                debug!(line = line_no, event = %event.kind(), "replaying event");
                session.observe(&event);
                bus.publish(event);
                replayed += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event line");
            }
        }
    }

    replayed
}
