// src/watch/mod.rs

//! Hot reload of the workflow file.
//!
//! A `notify` watcher observes the file's directory; every change is
//! content-hashed with blake3 so saves that leave the file identical are
//! ignored. Valid new content is sent to the runtime as
//! `RuntimeEvent::Reload`; invalid content is logged and the running
//! workflows stay as they are.

pub mod hash;
pub mod watcher;

pub use hash::{compute_file_hash, content_hash};
pub use watcher::{spawn_config_watcher, ReloadCheck, ReloadTracker, WatcherHandle};
