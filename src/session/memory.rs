// src/session/memory.rs

//! In-memory [`Session`] implementation.
//!
//! Keeps a table of torrents, records every operation performed on it and
//! publishes the events a real session would emit in response. Used by the
//! replay binary and by tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use tracing::debug;

use super::{EventBus, InfoHash, Session, SessionEvent, TorrentStatus};

/// One operation performed against a [`MemorySession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    PauseTorrent(InfoHash),
    ResumeTorrent(InfoHash),
    RecheckTorrent(InfoHash),
    RemoveTorrent { hash: InfoHash, remove_data: bool },
    MoveStorage { hash: InfoHash, path: PathBuf },
    ApplySettings(Map<String, Value>),
    Pause,
    Resume,
}

#[derive(Debug, Default)]
struct State {
    torrents: BTreeMap<InfoHash, TorrentStatus>,
    settings: Map<String, Value>,
    paused: bool,
    calls: Vec<SessionCall>,
    fail_storage_moves: Option<String>,
}

#[derive(Debug)]
pub struct MemorySession {
    bus: EventBus,
    state: Mutex<State>,
}

impl MemorySession {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Mutex::new(State::default()),
        }
    }

    /// Insert a torrent and publish `torrent_added`.
    pub fn add_torrent(&self, status: TorrentStatus) {
        self.lock()
            .torrents
            .insert(status.info_hash.clone(), status.clone());
        self.bus.publish(SessionEvent::TorrentAdded { torrent: status });
    }

    /// Mark a torrent as complete and publish `torrent_finished`.
    pub fn finish_torrent(&self, hash: &InfoHash) -> Result<()> {
        let status = self.update(hash, |t| t.progress = 1.0)?;
        self.bus.publish(SessionEvent::TorrentFinished { torrent: status });
        Ok(())
    }

    /// Keep the torrent table in sync with an externally produced event
    /// (e.g. one read from a replay file) without re-publishing it.
    pub fn observe(&self, event: &SessionEvent) {
        let mut state = self.lock();
        match event {
            SessionEvent::TorrentRemoved { info_hash } => {
                state.torrents.remove(info_hash);
            }
            other => {
                if let Some(torrent) = other.torrent() {
                    state
                        .torrents
                        .insert(torrent.info_hash.clone(), torrent.clone());
                }
            }
        }
    }

    /// Make subsequent storage moves fail with `message`, or succeed again
    /// with `None`.
    pub fn fail_storage_moves(&self, message: Option<String>) {
        self.lock().fail_storage_moves = message;
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.lock().calls.clone()
    }

    pub fn torrent(&self, hash: &InfoHash) -> Option<TorrentStatus> {
        self.lock().torrents.get(hash).cloned()
    }

    pub fn settings(&self) -> Map<String, Value> {
        self.lock().settings.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn record(&self, call: SessionCall) {
        debug!(?call, "memory session call");
        self.lock().calls.push(call);
    }

    fn update(
        &self,
        hash: &InfoHash,
        f: impl FnOnce(&mut TorrentStatus),
    ) -> Result<TorrentStatus> {
        let mut state = self.lock();
        let Some(torrent) = state.torrents.get_mut(hash) else {
            bail!("unknown torrent {hash}");
        };
        f(torrent);
        Ok(torrent.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Session for MemorySession {
    fn torrents(&self) -> Vec<TorrentStatus> {
        self.lock().torrents.values().cloned().collect()
    }

    fn pause_torrent(&self, hash: &InfoHash) -> Result<()> {
        let status = self.update(hash, |t| t.paused = true)?;
        self.record(SessionCall::PauseTorrent(hash.clone()));
        self.bus.publish(SessionEvent::TorrentPaused { torrent: status });
        Ok(())
    }

    fn resume_torrent(&self, hash: &InfoHash) -> Result<()> {
        let status = self.update(hash, |t| t.paused = false)?;
        self.record(SessionCall::ResumeTorrent(hash.clone()));
        self.bus.publish(SessionEvent::TorrentResumed { torrent: status });
        Ok(())
    }

    fn recheck_torrent(&self, hash: &InfoHash) -> Result<()> {
        self.update(hash, |_| {})?;
        self.record(SessionCall::RecheckTorrent(hash.clone()));
        Ok(())
    }

    fn remove_torrent(&self, hash: &InfoHash, remove_data: bool) -> Result<()> {
        if self.lock().torrents.remove(hash).is_none() {
            bail!("unknown torrent {hash}");
        }
        self.record(SessionCall::RemoveTorrent {
            hash: hash.clone(),
            remove_data,
        });
        self.bus.publish(SessionEvent::TorrentRemoved {
            info_hash: hash.clone(),
        });
        Ok(())
    }

    fn move_storage(&self, hash: &InfoHash, path: &Path) -> Result<()> {
        let failure = self.lock().fail_storage_moves.clone();

        let event = match failure {
            Some(error) => {
                let torrent = self.update(hash, |_| {})?;
                SessionEvent::StorageMoveFailed { torrent, error }
            }
            None => {
                let target = path.to_string_lossy().into_owned();
                let torrent = self.update(hash, |t| t.save_path = target)?;
                SessionEvent::StorageMoved { torrent }
            }
        };

        self.record(SessionCall::MoveStorage {
            hash: hash.clone(),
            path: path.to_path_buf(),
        });
        self.bus.publish(event);
        Ok(())
    }

    fn apply_settings(&self, settings: &Map<String, Value>) -> Result<()> {
        {
            let mut state = self.lock();
            for (key, value) in settings {
                state.settings.insert(key.clone(), value.clone());
            }
        }
        self.record(SessionCall::ApplySettings(settings.clone()));
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.lock().paused = true;
        self.record(SessionCall::Pause);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.lock().paused = false;
        self.record(SessionCall::Resume);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    #[test]
    fn move_storage_publishes_outcome_event() {
        let bus = EventBus::new();
        let session = MemorySession::new(bus.clone());
        session.add_torrent(TorrentStatus::new("aa", "show"));

        let mut sub = bus.subscribe([EventKind::StorageMoved, EventKind::StorageMoveFailed]);
        let hash = InfoHash::new("aa");

        session.move_storage(&hash, Path::new("/done")).unwrap();
        match sub.try_recv() {
            Some(SessionEvent::StorageMoved { torrent }) => assert_eq!(torrent.save_path, "/done"),
            other => panic!("expected storage_moved, got {other:?}"),
        }

        session.fail_storage_moves(Some("disk full".into()));
        session.move_storage(&hash, Path::new("/elsewhere")).unwrap();
        match sub.try_recv() {
            Some(SessionEvent::StorageMoveFailed { error, .. }) => assert_eq!(error, "disk full"),
            other => panic!("expected storage_move_failed, got {other:?}"),
        }
    }

    #[test]
    fn operations_on_unknown_torrents_fail() {
        let session = MemorySession::new(EventBus::new());
        let hash = InfoHash::new("ff");
        assert!(session.pause_torrent(&hash).is_err());
        assert!(session.remove_torrent(&hash, true).is_err());
        assert!(session.calls().is_empty());
    }

    #[test]
    fn observe_tracks_added_and_removed_torrents() {
        let session = MemorySession::new(EventBus::new());
        session.observe(&SessionEvent::TorrentAdded {
            torrent: TorrentStatus::new("aa", "x"),
        });
        assert!(session.torrent(&InfoHash::new("aa")).is_some());

        session.observe(&SessionEvent::TorrentRemoved {
            info_hash: InfoHash::new("aa"),
        });
        assert!(session.torrents().is_empty());
    }
}
