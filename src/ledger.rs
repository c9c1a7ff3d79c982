// src/ledger.rs

//! Synthetic cache and artifact bookkeeping.
//!
//! Only used for reporting: a cache "hit" never shortens a job, it just shows
//! up in job logs and in the metrics snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::debug;

use crate::types::{CacheOutcome, JobId, PipelineId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub saved_by: JobId,
    pub pipeline_id: PipelineId,
    pub saved_at: DateTime<Utc>,
}

pub type ArtifactId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub job_name: String,
    pub pipeline_id: PipelineId,
    pub paths: Vec<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A finished job's artifact upload, before the ledger assigns an id.
#[derive(Debug, Clone)]
pub struct ArtifactUpload<'a> {
    pub job_id: JobId,
    pub job_name: &'a str,
    pub pipeline_id: PipelineId,
    pub paths: &'a [String],
    pub size_bytes: u64,
    pub expire_in: Option<TimeDelta>,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    caches: BTreeMap<String, CacheEntry>,
    artifacts: Vec<Artifact>,
    next_artifact_id: ArtifactId,
    hits: u64,
    misses: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` at job start and count the outcome.
    pub fn restore(&mut self, key: &str) -> CacheOutcome {
        if self.caches.contains_key(key) {
            self.hits += 1;
            debug!(key, "cache hit");
            CacheOutcome::Hit
        } else {
            self.misses += 1;
            debug!(key, "cache miss");
            CacheOutcome::Miss
        }
    }

    pub fn save(&mut self, key: String, job_id: JobId, pipeline_id: PipelineId, now: DateTime<Utc>) {
        self.caches.insert(
            key.clone(),
            CacheEntry {
                key,
                saved_by: job_id,
                pipeline_id,
                saved_at: now,
            },
        );
    }

    pub fn upload(&mut self, upload: ArtifactUpload<'_>, now: DateTime<Utc>) -> ArtifactId {
        self.next_artifact_id += 1;
        let id = self.next_artifact_id;
        self.artifacts.push(Artifact {
            id,
            job_id: upload.job_id,
            job_name: upload.job_name.to_string(),
            pipeline_id: upload.pipeline_id,
            paths: upload.paths.to_vec(),
            size_bytes: upload.size_bytes,
            created_at: now,
            expires_at: upload.expire_in.map(|d| now + d),
        });
        debug!(
            artifact = id,
            pipeline_id = upload.pipeline_id,
            job = upload.job_name,
            size_bytes = upload.size_bytes,
            "artifact uploaded"
        );
        id
    }

    /// Drop artifacts whose expiry has passed. Returns how many were removed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.artifacts.len();
        self.artifacts
            .retain(|a| a.expires_at.is_none_or(|at| at > now));
        before - self.artifacts.len()
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn caches(&self) -> impl Iterator<Item = &CacheEntry> {
        self.caches.values()
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.misses
    }

    pub fn artifact_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }
}
