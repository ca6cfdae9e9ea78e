// src/types.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of a session event, used both as the event tag and as the trigger
/// vocabulary of workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TorrentAdded,
    TorrentFinished,
    TorrentPaused,
    TorrentResumed,
    TorrentRemoved,
    StorageMoved,
    StorageMoveFailed,
    TrackerError,
    TrackerReply,
    MediaInfo,
    SessionStats,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::TorrentAdded,
        EventKind::TorrentFinished,
        EventKind::TorrentPaused,
        EventKind::TorrentResumed,
        EventKind::TorrentRemoved,
        EventKind::StorageMoved,
        EventKind::StorageMoveFailed,
        EventKind::TrackerError,
        EventKind::TrackerReply,
        EventKind::MediaInfo,
        EventKind::SessionStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TorrentAdded => "torrent_added",
            EventKind::TorrentFinished => "torrent_finished",
            EventKind::TorrentPaused => "torrent_paused",
            EventKind::TorrentResumed => "torrent_resumed",
            EventKind::TorrentRemoved => "torrent_removed",
            EventKind::StorageMoved => "storage_moved",
            EventKind::StorageMoveFailed => "storage_move_failed",
            EventKind::TrackerError => "tracker_error",
            EventKind::TrackerReply => "tracker_reply",
            EventKind::MediaInfo => "media_info",
            EventKind::SessionStats => "session_stats",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown event kind: {wanted}"))
    }
}

/// Behaviour when a workflow matches while the active-runner cap is reached
/// and the pending queue is full.
///
/// - `Queue`: keep what is already pending and drop the new run (default).
/// - `Cancel`: drop the oldest pending run so the latest trigger gets a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowBehaviour {
    Queue,
    Cancel,
}

impl Default for OverflowBehaviour {
    fn default() -> Self {
        OverflowBehaviour::Queue
    }
}

impl FromStr for OverflowBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(OverflowBehaviour::Queue),
            "cancel" => Ok(OverflowBehaviour::Cancel),
            other => Err(format!(
                "invalid overflow_behaviour: {other} (expected \"queue\" or \"cancel\")"
            )),
        }
    }
}

/// Parse a duration such as `"250ms"`, `"3s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
