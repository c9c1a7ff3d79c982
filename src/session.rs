// src/session.rs

//! An explicit registry of running engines, keyed by component id.
//!
//! Each component is an independent simulation (its own config, runners and
//! history). Nothing is global: whoever owns the `Session` owns the engines.

use std::collections::BTreeMap;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{EngineHandle, PipelineEngine};
use crate::errors::{EngineError, EntityKind, Result};

#[derive(Debug)]
struct Component {
    handle: EngineHandle,
    join: JoinHandle<PipelineEngine>,
}

#[derive(Debug, Default)]
pub struct Session {
    components: BTreeMap<String, Component>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an actor for `engine` under `id`. Must run inside a Tokio
    /// runtime.
    pub fn spawn(&mut self, id: impl Into<String>, engine: PipelineEngine) -> Result<EngineHandle> {
        let id = id.into();
        if self.components.contains_key(&id) {
            return Err(EngineError::conflict(format!("component {id} already exists")));
        }
        let (handle, join) = EngineHandle::spawn(engine);
        info!(component = %id, "component started");
        self.components.insert(
            id,
            Component {
                handle: handle.clone(),
                join,
            },
        );
        Ok(handle)
    }

    pub fn handle(&self, id: &str) -> Result<EngineHandle> {
        self.components
            .get(id)
            .map(|c| c.handle.clone())
            .ok_or_else(|| EngineError::not_found(EntityKind::Component, id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Stop one component and return its final engine state.
    pub async fn remove(&mut self, id: &str) -> Result<PipelineEngine> {
        let component = self
            .components
            .remove(id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Component, id))?;
        let _ = component.handle.shutdown().await;
        let engine = component
            .join
            .await
            .map_err(|err| EngineError::Other(err.into()))?;
        info!(component = %id, "component stopped");
        Ok(engine)
    }

    /// Stop every component, returning their final states by id.
    pub async fn shutdown(mut self) -> BTreeMap<String, PipelineEngine> {
        let mut engines = BTreeMap::new();
        let ids: Vec<String> = self.components.keys().cloned().collect();
        for id in ids {
            match self.remove(&id).await {
                Ok(engine) => {
                    engines.insert(id, engine);
                }
                Err(err) => warn!(component = %id, error = %err, "component did not stop cleanly"),
            }
        }
        engines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::ConfigFile;

    #[tokio::test]
    async fn unknown_component_is_not_found() {
        let mut session = Session::new();
        session
            .spawn("alpha", PipelineEngine::new(ConfigFile::empty()))
            .unwrap();

        assert!(session.handle("alpha").is_ok());
        assert!(matches!(
            session.handle("beta"),
            Err(EngineError::NotFound {
                kind: EntityKind::Component,
                ..
            })
        ));
        assert!(matches!(
            session.spawn("alpha", PipelineEngine::new(ConfigFile::empty())),
            Err(EngineError::Conflict(_))
        ));

        let engines = session.shutdown().await;
        assert_eq!(engines.len(), 1);
    }
}
