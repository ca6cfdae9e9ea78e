// src/session/mod.rs

//! Boundary to the transfer session.
//!
//! The engine never talks to a torrent library directly. It consumes
//! [`SessionEvent`]s from the [`EventBus`] and acts on torrents through the
//! [`Session`] trait.
//!
//! - [`bus`] is the typed, thread-safe event bus.
//! - [`memory`] is an in-memory session used by the replay binary and tests.
//! - [`replay`] feeds JSON-lines event files into the bus.

pub mod bus;
pub mod memory;
pub mod replay;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::EventKind;

pub use bus::{EventBus, Subscription};
pub use memory::{MemorySession, SessionCall};
pub use replay::{spawn_replay, ReplaySource};

/// Hex-encoded torrent info hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfoHash(String);

impl InfoHash {
    pub fn new(hash: impl AsRef<str>) -> Self {
        Self(hash.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a torrent's status at the time an event was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatus {
    pub info_hash: InfoHash,
    pub name: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paused: bool,
}

impl TorrentStatus {
    pub fn new(info_hash: impl AsRef<str>, name: impl Into<String>) -> Self {
        Self {
            info_hash: InfoHash::new(info_hash),
            name: name.into(),
            save_path: String::new(),
            progress: 0.0,
            total_size: 0,
            category: None,
            tags: Vec::new(),
            paused: false,
        }
    }
}

/// Notification emitted by the session.
///
/// Serialized with an `"event"` tag, so a replay line looks like
/// `{"event":"torrent_finished","torrent":{"info_hash":"ab..","name":"x"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    TorrentAdded {
        torrent: TorrentStatus,
    },
    TorrentFinished {
        torrent: TorrentStatus,
    },
    TorrentPaused {
        torrent: TorrentStatus,
    },
    TorrentResumed {
        torrent: TorrentStatus,
    },
    TorrentRemoved {
        info_hash: InfoHash,
    },
    StorageMoved {
        torrent: TorrentStatus,
    },
    StorageMoveFailed {
        torrent: TorrentStatus,
        error: String,
    },
    TrackerError {
        torrent: TorrentStatus,
        tracker_url: String,
        message: String,
    },
    TrackerReply {
        torrent: TorrentStatus,
        tracker_url: String,
    },
    MediaInfo {
        torrent: TorrentStatus,
    },
    SessionStats {
        stats: BTreeMap<String, i64>,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::TorrentAdded { .. } => EventKind::TorrentAdded,
            SessionEvent::TorrentFinished { .. } => EventKind::TorrentFinished,
            SessionEvent::TorrentPaused { .. } => EventKind::TorrentPaused,
            SessionEvent::TorrentResumed { .. } => EventKind::TorrentResumed,
            SessionEvent::TorrentRemoved { .. } => EventKind::TorrentRemoved,
            SessionEvent::StorageMoved { .. } => EventKind::StorageMoved,
            SessionEvent::StorageMoveFailed { .. } => EventKind::StorageMoveFailed,
            SessionEvent::TrackerError { .. } => EventKind::TrackerError,
            SessionEvent::TrackerReply { .. } => EventKind::TrackerReply,
            SessionEvent::MediaInfo { .. } => EventKind::MediaInfo,
            SessionEvent::SessionStats { .. } => EventKind::SessionStats,
        }
    }

    /// The torrent snapshot carried by the event, if any.
    pub fn torrent(&self) -> Option<&TorrentStatus> {
        match self {
            SessionEvent::TorrentAdded { torrent }
            | SessionEvent::TorrentFinished { torrent }
            | SessionEvent::TorrentPaused { torrent }
            | SessionEvent::TorrentResumed { torrent }
            | SessionEvent::StorageMoved { torrent }
            | SessionEvent::StorageMoveFailed { torrent, .. }
            | SessionEvent::TrackerError { torrent, .. }
            | SessionEvent::TrackerReply { torrent, .. }
            | SessionEvent::MediaInfo { torrent } => Some(torrent),
            SessionEvent::TorrentRemoved { .. } | SessionEvent::SessionStats { .. } => None,
        }
    }

    pub fn info_hash(&self) -> Option<&InfoHash> {
        match self {
            SessionEvent::TorrentRemoved { info_hash } => Some(info_hash),
            other => other.torrent().map(|t| &t.info_hash),
        }
    }

    /// JSON object used to seed an execution context.
    pub fn payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Every variant is a struct variant, so this is unreachable in
            // practice; fall back to just the tag.
            _ => {
                let mut map = Map::new();
                map.insert("event".into(), Value::String(self.kind().to_string()));
                map
            }
        }
    }
}

/// Operations the engine may perform on the live session.
///
/// Calls are non-blocking requests. Operations whose outcome arrives later
/// (such as [`Session::move_storage`]) report it through the event bus.
pub trait Session: Send + Sync + fmt::Debug {
    fn torrents(&self) -> Vec<TorrentStatus>;

    fn pause_torrent(&self, hash: &InfoHash) -> Result<()>;

    fn resume_torrent(&self, hash: &InfoHash) -> Result<()>;

    fn recheck_torrent(&self, hash: &InfoHash) -> Result<()>;

    fn remove_torrent(&self, hash: &InfoHash, remove_data: bool) -> Result<()>;

    /// Request a storage move; completion is signalled by a
    /// `storage_moved` or `storage_move_failed` event.
    fn move_storage(&self, hash: &InfoHash, path: &Path) -> Result<()>;

    fn apply_settings(&self, settings: &Map<String, Value>) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_carries_tag_and_torrent() {
        let mut torrent = TorrentStatus::new("ABCDEF", "ubuntu.iso");
        torrent.total_size = 42;
        let event = SessionEvent::TorrentFinished { torrent };

        let payload = event.payload();
        assert_eq!(payload["event"], "torrent_finished");
        assert_eq!(payload["torrent"]["name"], "ubuntu.iso");
        assert_eq!(payload["torrent"]["info_hash"], "abcdef");
        assert_eq!(payload["torrent"]["total_size"], 42);
    }

    #[test]
    fn parses_replay_line_with_defaults() {
        let line = r#"{"event":"tracker_error","torrent":{"info_hash":"aa","name":"x"},"tracker_url":"udp://t","message":"timeout"}"#;
        let event: SessionEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind(), EventKind::TrackerError);
        assert_eq!(event.info_hash(), Some(&InfoHash::new("aa")));
        assert_eq!(event.torrent().unwrap().progress, 0.0);
    }
}
