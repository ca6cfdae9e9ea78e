// src/actions/move_storage.rs

//! `move_storage`: ask the session to move a torrent's data, then wait on
//! the event bus for the session to report how it went.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::builtin::target_hash;
use super::{params, Action, ActionBuilder, ActionResources};
use crate::engine::Continuation;
use crate::session::{EventBus, Session, SessionEvent};
use crate::types::EventKind;
use crate::workflow::ExecutionContext;

pub struct MoveStorageBuilder;

impl ActionBuilder for MoveStorageBuilder {
    fn build(&self, params: &Value, resources: &ActionResources) -> Result<Box<dyn Action>> {
        Ok(Box::new(MoveStorageAction {
            path: params::str(params, "path")?.to_string(),
            info_hash: params::opt_str(params, "info_hash")?.map(str::to_string),
            session: Arc::clone(&resources.session),
            bus: resources.bus.clone(),
            io: resources.io.clone(),
        }))
    }
}

struct MoveStorageAction {
    path: String,
    info_hash: Option<String>,
    session: Arc<dyn Session>,
    bus: EventBus,
    io: Handle,
}

impl Action for MoveStorageAction {
    fn invoke(self: Box<Self>, ctx: &ExecutionContext, done: Continuation) -> Result<()> {
        let hash = target_hash(self.info_hash.as_deref(), ctx)?;
        let path = PathBuf::from(ctx.render(&self.path)?);

        // Subscribe before issuing the request so the outcome cannot slip by.
        let mut outcomes = self
            .bus
            .subscribe([EventKind::StorageMoved, EventKind::StorageMoveFailed]);

        self.session.move_storage(&hash, &path)?;
        debug!(info_hash = %hash, path = ?path, "storage move requested");

        self.io.spawn(async move {
            while let Some(event) = outcomes.recv().await {
                if event.info_hash() != Some(&hash) {
                    continue;
                }
                match event {
                    SessionEvent::StorageMoved { torrent } => {
                        done.complete(json!({
                            "moved": true,
                            "info_hash": hash,
                            "path": torrent.save_path,
                        }));
                    }
                    SessionEvent::StorageMoveFailed { error, .. } => {
                        warn!(info_hash = %hash, error = %error, "storage move failed");
                        done.complete(json!({
                            "moved": false,
                            "info_hash": hash,
                            "error": error,
                        }));
                    }
                    // Only the two kinds above are subscribed.
                    _ => continue,
                }
                return;
            }

            done.complete(json!({
                "moved": false,
                "info_hash": hash,
                "error": "event bus closed before the move finished",
            }));
        });

        Ok(())
    }
}
