// src/pipeline/dispatch_step.rs

//! Result types for one dispatcher pass.

use serde::Serialize;

use crate::types::{JobId, PipelineId};

/// What changed during a single `tick`.
///
/// Tests step the engine manually and assert on these lists instead of
/// diffing whole snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStep {
    /// Jobs bound to a runner in this step.
    pub started: Vec<JobId>,
    /// Jobs that resolved `success`.
    pub succeeded: Vec<JobId>,
    /// Jobs that resolved `failed` with no automatic retry left.
    pub failed: Vec<JobId>,
    /// Jobs re-queued for another automatic attempt.
    pub retried: Vec<JobId>,
    /// Jobs whose `when` condition can no longer hold.
    pub skipped: Vec<JobId>,
    /// Child executions started by trigger jobs.
    pub child_pipelines: Vec<PipelineId>,
    /// Executions that reached a terminal status.
    pub finished_pipelines: Vec<PipelineId>,
    /// Terminal executions dropped by `history_limit`.
    pub pruned: Vec<PipelineId>,
}

impl DispatchStep {
    pub fn is_quiet(&self) -> bool {
        self.started.is_empty()
            && self.succeeded.is_empty()
            && self.failed.is_empty()
            && self.retried.is_empty()
            && self.skipped.is_empty()
            && self.child_pipelines.is_empty()
            && self.finished_pipelines.is_empty()
    }
}
