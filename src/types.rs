use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Engine-assigned execution id. Fresh for every `start` and `retry`.
pub type PipelineId = u64;
/// Engine-assigned job id, unique across all executions.
pub type JobId = u64;
/// Config-assigned pipeline template id.
pub type TemplateId = String;
/// Config-assigned runner id.
pub type RunnerId = String;
/// Config-assigned schedule id.
pub type ScheduleId = String;

/// When a job becomes eligible relative to the outcome of earlier stages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenPolicy {
    /// Run only if every earlier stage succeeded (default).
    #[default]
    OnSuccess,
    /// Run only if an earlier stage failed.
    OnFailure,
    /// Run regardless of earlier stages, including after a cancellation.
    Always,
    /// Never auto-dispatch; wait for an explicit play command.
    Manual,
}

impl FromStr for WhenPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on_success" => Ok(WhenPolicy::OnSuccess),
            "on_failure" => Ok(WhenPolicy::OnFailure),
            "always" => Ok(WhenPolicy::Always),
            "manual" => Ok(WhenPolicy::Manual),
            other => Err(format!(
                "invalid when policy: {other} (expected \"on_success\", \"on_failure\", \"always\" or \"manual\")"
            )),
        }
    }
}

impl fmt::Display for WhenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WhenPolicy::OnSuccess => "on_success",
            WhenPolicy::OnFailure => "on_failure",
            WhenPolicy::Always => "always",
            WhenPolicy::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// What caused a pipeline execution to be created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    #[default]
    Push,
    Web,
    Api,
    Schedule,
    Trigger,
    ParentPipeline,
}

impl FromStr for PipelineSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(PipelineSource::Push),
            "web" => Ok(PipelineSource::Web),
            "api" => Ok(PipelineSource::Api),
            "schedule" => Ok(PipelineSource::Schedule),
            "trigger" => Ok(PipelineSource::Trigger),
            "parent_pipeline" => Ok(PipelineSource::ParentPipeline),
            other => Err(format!("invalid pipeline source: {other}")),
        }
    }
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineSource::Push => "push",
            PipelineSource::Web => "web",
            PipelineSource::Api => "api",
            PipelineSource::Schedule => "schedule",
            PipelineSource::Trigger => "trigger",
            PipelineSource::ParentPipeline => "parent_pipeline",
        };
        f.write_str(s)
    }
}

/// Per-job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Instantiated, its stage has not been reached yet.
    Created,
    /// Eligible and waiting for a runner.
    Pending,
    /// Bound to a runner (or waiting on a child pipeline).
    Running,
    /// Waiting for an explicit play command.
    Manual,
    Success,
    Failed,
    Canceled,
    /// Its `when` condition can no longer hold.
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped
        )
    }

    /// Pending or running: holds up its stage and may hold a runner slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Manual => "manual",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Derived stage state. Never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Success | StageStatus::Failed | StageStatus::Canceled
        )
    }
}

/// Pipeline execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Success | PipelineStatus::Failed | PipelineStatus::Canceled
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStatus::Created => "created",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Why a job ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ScriptFailure,
    JobTimeout,
    /// A trigger job's child pipeline did not succeed.
    DownstreamFailed,
    /// A trigger job could not create its child pipeline.
    TriggerFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::ScriptFailure => "script_failure",
            FailureReason::JobTimeout => "job_timeout",
            FailureReason::DownstreamFailed => "downstream_pipeline_failure",
            FailureReason::TriggerFailed => "trigger_failure",
        };
        f.write_str(s)
    }
}

/// Result of a cache restore at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
}
