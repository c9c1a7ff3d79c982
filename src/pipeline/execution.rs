// src/pipeline/execution.rs

//! Live pipeline executions: jobs, stages and their derived statuses.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};

use crate::ledger::ArtifactId;
use crate::pipeline::template::{JobTemplate, PipelineTemplate};
use crate::runner::JobPlan;
use crate::types::{
    CacheOutcome, FailureReason, JobId, JobStatus, PipelineId, PipelineSource, PipelineStatus,
    RunnerId, ScheduleId, StageStatus, TemplateId, WhenPolicy,
};

/// One job instance inside an execution.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub stage: String,
    pub pipeline_id: PipelineId,
    pub when: WhenPolicy,
    pub allow_failure: bool,
    pub tags: Vec<String>,
    pub status: JobStatus,
    pub runner_id: Option<RunnerId>,
    /// 1-based; bumped by automatic job retries.
    pub attempt: u32,
    /// When the job last became pending.
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Synthetic run time of the current attempt, known once bound.
    #[serde(serialize_with = "serialize_opt_secs")]
    pub duration: Option<TimeDelta>,
    pub failure_reason: Option<FailureReason>,
    pub environment: Option<String>,
    pub child_pipeline_id: Option<PipelineId>,
    pub cache: Option<CacheOutcome>,
    pub artifact_ids: Vec<ArtifactId>,
    /// Time spent pending before the first bind.
    #[serde(serialize_with = "serialize_opt_secs")]
    pub queue_wait: Option<TimeDelta>,
    #[serde(skip)]
    pub plan: Option<JobPlan>,
    #[serde(skip)]
    pub spec: Arc<JobTemplate>,
}

impl Job {
    pub fn new(id: JobId, pipeline_id: PipelineId, spec: Arc<JobTemplate>) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            stage: spec.stage.clone(),
            pipeline_id,
            when: spec.when,
            allow_failure: spec.allow_failure,
            tags: spec.tags.iter().cloned().collect(),
            status: JobStatus::Created,
            runner_id: None,
            attempt: 1,
            queued_at: None,
            started_at: None,
            finished_at: None,
            duration: None,
            failure_reason: None,
            environment: spec.environment.clone(),
            child_pipeline_id: None,
            cache: None,
            artifact_ids: Vec::new(),
            queue_wait: None,
            plan: None,
            spec,
        }
    }

    pub fn is_trigger(&self) -> bool {
        self.spec.is_trigger()
    }

    /// A failed job that counts against its stage.
    pub fn is_blocking_failure(&self) -> bool {
        self.status == JobStatus::Failed && !self.allow_failure
    }

    pub fn enqueue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.queued_at = Some(now);
    }

    pub fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(now);
    }

    /// Reset for another automatic attempt. The caller releases the runner.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.attempt += 1;
        self.runner_id = None;
        self.started_at = None;
        self.finished_at = None;
        self.duration = None;
        self.failure_reason = None;
        self.cache = None;
        self.plan = None;
        self.enqueue(now);
    }

    /// Instant the current attempt resolves, if bound.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        Some(self.started_at? + self.plan?.run_for)
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        Some((end - started).max(TimeDelta::zero()))
    }

    /// Fraction in `[0, 1]` of the synthetic run that has elapsed.
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        if self.status.is_terminal() {
            return 1.0;
        }
        match (self.elapsed(now), self.duration) {
            (Some(elapsed), Some(total)) if total > TimeDelta::zero() => {
                (elapsed.num_milliseconds() as f64 / total.num_milliseconds() as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

/// Stage status as a pure function of its jobs.
///
/// `failed` as soon as a job without `allow_failure` failed. Otherwise
/// `success` (or `canceled` if any job was canceled) once every job is
/// terminal. An unplayed manual job keeps the stage `running`.
pub fn derive_stage_status(jobs: &[Job]) -> StageStatus {
    if jobs.iter().any(Job::is_blocking_failure) {
        return StageStatus::Failed;
    }
    if jobs.iter().all(|j| j.status.is_terminal()) {
        if jobs.iter().any(|j| j.status == JobStatus::Canceled) {
            return StageStatus::Canceled;
        }
        return StageStatus::Success;
    }
    if jobs
        .iter()
        .any(|j| matches!(j.status, JobStatus::Running | JobStatus::Manual))
    {
        return StageStatus::Running;
    }
    if jobs.iter().any(|j| j.status == JobStatus::Pending) {
        return StageStatus::Pending;
    }
    StageStatus::Created
}

/// What the stages before a given stage ended as, for `when` routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Success,
    Failed,
    /// A job upstream was canceled, e.g. a trigger job whose child pipeline
    /// was canceled.
    Canceled,
}

impl Upstream {
    /// Whether a job with `when` should be enqueued after this outcome.
    ///
    /// After a cancellation only `always` jobs run.
    pub fn admits(self, when: WhenPolicy) -> bool {
        matches!(
            (when, self),
            (WhenPolicy::Always, _)
                | (WhenPolicy::OnSuccess, Upstream::Success)
                | (WhenPolicy::OnFailure, Upstream::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub name: String,
    pub status: StageStatus,
    pub jobs: Vec<Job>,
}

impl Stage {
    pub fn refresh(&mut self) -> StageStatus {
        self.status = derive_stage_status(&self.jobs);
        self.status
    }

    /// Every job reached a terminal status; the next stage may open.
    pub fn is_settled(&self) -> bool {
        self.jobs.iter().all(|j| j.status.is_terminal())
    }

    pub fn has_active_jobs(&self) -> bool {
        self.jobs.iter().any(|j| j.status.is_active())
    }
}

/// One run of a template.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineExecution {
    pub id: PipelineId,
    /// Shared by every retry of the same logical pipeline.
    pub iid: u64,
    pub template_id: TemplateId,
    pub git_ref: String,
    pub source: PipelineSource,
    pub attempt: u32,
    pub status: PipelineStatus,
    pub stages: Vec<Stage>,
    pub parent_pipeline_id: Option<PipelineId>,
    pub child_pipeline_ids: Vec<PipelineId>,
    pub schedule_id: Option<ScheduleId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_opt_secs")]
    pub duration: Option<TimeDelta>,
    /// Id of the execution that retried this one.
    pub retried_by: Option<PipelineId>,
    #[serde(skip)]
    pub template: Arc<PipelineTemplate>,
}

impl PipelineExecution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.stages.iter_mut().flat_map(|s| s.jobs.iter_mut())
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs().find(|j| j.id == id)
    }

    pub fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs_mut().find(|j| j.id == id)
    }

    /// `(stage index, job index)` of a job.
    pub fn locate(&self, id: JobId) -> Option<(usize, usize)> {
        self.stages.iter().enumerate().find_map(|(si, stage)| {
            stage
                .jobs
                .iter()
                .position(|j| j.id == id)
                .map(|ji| (si, ji))
        })
    }

    /// Index of the first stage with unfinished jobs.
    pub fn current_stage(&self) -> Option<usize> {
        self.stages.iter().position(|s| !s.is_settled())
    }

    /// Combined outcome of the stages before `idx`. A failure outranks a
    /// cancellation.
    pub fn upstream(&self, idx: usize) -> Upstream {
        let earlier = &self.stages[..idx];
        if earlier.iter().any(|s| s.status == StageStatus::Failed) {
            Upstream::Failed
        } else if earlier.iter().any(|s| s.status == StageStatus::Canceled) {
            Upstream::Canceled
        } else {
            Upstream::Success
        }
    }

    /// Recompute stage statuses and the pipeline status from its jobs.
    ///
    /// Canceled pipelines stay canceled; cancel sets that status directly.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> PipelineStatus {
        for stage in &mut self.stages {
            stage.refresh();
        }
        if self.status == PipelineStatus::Canceled {
            return self.status;
        }

        let next = if self.stages.iter().all(Stage::is_settled) {
            if self.stages.iter().any(|s| s.status == StageStatus::Failed) {
                PipelineStatus::Failed
            } else if self.stages.iter().any(|s| s.status == StageStatus::Canceled) {
                PipelineStatus::Canceled
            } else {
                PipelineStatus::Success
            }
        } else if self.jobs().any(|j| {
            matches!(j.status, JobStatus::Running | JobStatus::Manual) || j.status.is_terminal()
        }) {
            PipelineStatus::Running
        } else if self.jobs().any(|j| j.status == JobStatus::Pending) {
            PipelineStatus::Pending
        } else {
            PipelineStatus::Created
        };

        if next == PipelineStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.mark_finished(now);
        }
        self.status = next;
        next
    }

    pub fn mark_finished(&mut self, now: DateTime<Utc>) {
        if self.finished_at.is_none() {
            self.finished_at = Some(now);
            let from = self.started_at.unwrap_or(self.created_at);
            self.duration = Some((now - from).max(TimeDelta::zero()));
        }
    }
}

fn serialize_opt_secs<S: Serializer>(d: &Option<TimeDelta>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.num_milliseconds() as f64 / 1000.0)),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn job(id: JobId, status: JobStatus, allow_failure: bool) -> Job {
        let spec = Arc::new(JobTemplate {
            name: format!("job{id}"),
            stage: "test".into(),
            when: WhenPolicy::OnSuccess,
            allow_failure,
            tags: BTreeSet::new(),
            script: vec![],
            duration: None,
            timeout: None,
            fail_rate: None,
            retry: 0,
            only: None,
            except: None,
            environment: None,
            trigger: None,
            cache: None,
            artifacts: None,
            variables: BTreeMap::new(),
        });
        let mut j = Job::new(id, 1, spec);
        j.status = status;
        j
    }

    #[test]
    fn allowed_failure_does_not_fail_the_stage() {
        let jobs = vec![
            job(1, JobStatus::Failed, true),
            job(2, JobStatus::Success, false),
        ];
        assert_eq!(derive_stage_status(&jobs), StageStatus::Success);
    }

    #[test]
    fn blocking_failure_fails_even_while_siblings_run() {
        let jobs = vec![
            job(1, JobStatus::Failed, false),
            job(2, JobStatus::Running, false),
        ];
        assert_eq!(derive_stage_status(&jobs), StageStatus::Failed);
    }

    #[test]
    fn manual_job_keeps_stage_running() {
        let jobs = vec![
            job(1, JobStatus::Success, false),
            job(2, JobStatus::Manual, false),
        ];
        assert_eq!(derive_stage_status(&jobs), StageStatus::Running);
    }

    #[test]
    fn pending_only_stage_is_pending() {
        let jobs = vec![
            job(1, JobStatus::Pending, false),
            job(2, JobStatus::Created, false),
        ];
        assert_eq!(derive_stage_status(&jobs), StageStatus::Pending);
    }

    #[test]
    fn only_always_runs_after_a_cancellation() {
        use WhenPolicy::*;
        assert!(Upstream::Success.admits(OnSuccess));
        assert!(!Upstream::Success.admits(OnFailure));
        assert!(Upstream::Failed.admits(OnFailure));
        assert!(!Upstream::Failed.admits(OnSuccess));
        assert!(Upstream::Canceled.admits(Always));
        for when in [OnSuccess, OnFailure, Manual] {
            assert!(!Upstream::Canceled.admits(when), "{when} ran after cancel");
        }
    }
}
