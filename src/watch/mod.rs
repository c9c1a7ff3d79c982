// src/watch/mod.rs

//! Config hot reload.
//!
//! This module is responsible for:
//! - Watching the config file with a cross-platform watcher (`notify`).
//! - Hashing its content (`blake3`) so saves that change nothing are ignored.
//! - Validating changed content and handing it to the engine as an
//!   `update_config` request.
//!
//! It does **not** know how reconciliation works; invalid content is logged
//! and the engine keeps its current configuration.

pub mod reload;
pub mod watcher;

pub use reload::{ConfigReloader, ReloadOutcome, content_hash};
pub use watcher::{WatcherHandle, spawn_config_watcher};
