// src/watch/reload.rs

//! Turning config file changes into `update_config` requests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, info, warn};

use crate::config::loader::{ConfigFormat, validate_str};
use crate::engine::{EngineHandle, ReconcileReport};

/// Hash of the file content, hex encoded.
pub fn content_hash(contents: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// What happened to one reload attempt.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Content hash matched the last applied version.
    Unchanged,
    /// New content failed validation and was not applied.
    Rejected(String),
    Applied(ReconcileReport),
}

/// Re-reads one config file and pushes valid changes into the engine.
#[derive(Debug)]
pub struct ConfigReloader {
    path: PathBuf,
    format: ConfigFormat,
    handle: EngineHandle,
    last_hash: Option<String>,
}

impl ConfigReloader {
    pub fn new(path: impl Into<PathBuf>, handle: EngineHandle) -> Self {
        let path = path.into();
        Self {
            format: ConfigFormat::from_path(&path),
            path,
            handle,
            last_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the content the engine was started with, so the first
    /// filesystem event for an untouched file is a no-op.
    pub fn prime(&mut self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading config file {:?}", self.path))?;
        self.last_hash = Some(content_hash(&contents));
        Ok(())
    }

    /// Re-read the file and apply it if its content changed and is valid.
    pub async fn reload(&mut self) -> Result<ReloadOutcome> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading config file {:?}", self.path))?;
        self.apply_contents(&contents).await
    }

    pub async fn apply_contents(&mut self, contents: &str) -> Result<ReloadOutcome> {
        let hash = content_hash(contents);
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            debug!(path = ?self.path, "config content unchanged; ignoring event");
            return Ok(ReloadOutcome::Unchanged);
        }

        let config = match validate_str(contents, self.format) {
            Ok(config) => config,
            Err(err) => {
                // The engine keeps running the last applied content.
                warn!(path = ?self.path, error = %err, "config change rejected; keeping current config");
                return Ok(ReloadOutcome::Rejected(err.to_string()));
            }
        };

        let report = self
            .handle
            .update_config(config)
            .await
            .context("sending reloaded config to engine")?;
        self.last_hash = Some(hash);
        info!(path = ?self.path, "config reloaded");
        Ok(ReloadOutcome::Applied(report))
    }
}
