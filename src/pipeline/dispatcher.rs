// src/pipeline/dispatcher.rs

//! The dispatcher: the three phases of a tick over live executions.
//!
//! 1. [`Dispatcher::retire`] resolves running jobs whose synthetic time is up
//!    and returns their runner slots; [`mirror_children`] resolves trigger
//!    jobs from their child execution.
//! 2. [`open_stages`] walks each execution forward: the first unsettled stage
//!    has its `created` jobs evaluated against `when`, and stages that settle
//!    immediately (all skipped, say) let the next one open in the same pass.
//! 3. [`Dispatcher::admit`] binds pending jobs to runners in one global FIFO
//!    pass, so freed capacity goes to the job that has waited longest.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::model::Settings;
use crate::ledger::{ArtifactUpload, Ledger};
use crate::pipeline::dispatch_step::DispatchStep;
use crate::pipeline::execution::{Job, PipelineExecution, Upstream};
use crate::pipeline::variables::{PipelineContext, VariableSet};
use crate::resources::{Deployment, Environment, Variable};
use crate::runner::policy::{self, PlanInput, PlannedOutcome};
use crate::runner::RunnerPool;
use crate::types::{
    FailureReason, JobId, JobStatus, PipelineId, PipelineStatus, StageStatus, TemplateId,
    WhenPolicy,
};

/// A trigger job that needs its child execution created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub parent_id: PipelineId,
    pub job_id: JobId,
    pub target: TemplateId,
}

/// Borrowed view of the engine state the dispatcher mutates.
pub struct Dispatcher<'a> {
    pub settings: &'a Settings,
    pub pool: &'a mut RunnerPool,
    pub ledger: &'a mut Ledger,
    pub environments: &'a mut Vec<Environment>,
    pub variables: &'a [Variable],
}

impl Dispatcher<'_> {
    /// Resolve running jobs whose synthetic duration has elapsed.
    pub fn retire(&mut self, exec: &mut PipelineExecution, now: DateTime<Utc>, step: &mut DispatchStep) {
        let ctx = PipelineContext {
            pipeline_id: exec.id,
            iid: exec.iid,
            git_ref: &exec.git_ref,
            source: exec.source,
            template: &exec.template,
        };

        for job in exec.stages.iter_mut().flat_map(|s| s.jobs.iter_mut()) {
            if job.status != JobStatus::Running || job.is_trigger() {
                continue;
            }
            let (Some(due), Some(plan)) = (job.due_at(), job.plan) else {
                continue;
            };
            if now < due {
                continue;
            }

            if let Some(runner) = &job.runner_id {
                self.pool.release(runner);
            }

            let reason = match plan.outcome {
                PlannedOutcome::Success => {
                    job.finish(JobStatus::Success, now);
                    self.on_success(&ctx, job, now);
                    info!(
                        pipeline_id = ctx.pipeline_id,
                        job = %job.name,
                        job_id = job.id,
                        "job succeeded"
                    );
                    step.succeeded.push(job.id);
                    continue;
                }
                PlannedOutcome::ScriptFailure => FailureReason::ScriptFailure,
                PlannedOutcome::Timeout => FailureReason::JobTimeout,
            };

            if job.attempt <= job.spec.retry {
                info!(
                    pipeline_id = ctx.pipeline_id,
                    job = %job.name,
                    attempt = job.attempt,
                    %reason,
                    "job failed; retrying"
                );
                job.requeue(now);
                step.retried.push(job.id);
            } else {
                job.failure_reason = Some(reason);
                job.finish(JobStatus::Failed, now);
                warn!(
                    pipeline_id = ctx.pipeline_id,
                    job = %job.name,
                    job_id = job.id,
                    %reason,
                    allow_failure = job.allow_failure,
                    "job failed"
                );
                step.failed.push(job.id);
            }
        }
    }

    /// Cache save, artifact upload and deployment record for a finished job.
    fn on_success(&mut self, ctx: &PipelineContext<'_>, job: &mut Job, now: DateTime<Utc>) {
        let spec = Arc::clone(&job.spec);

        if self.settings.enable_cache {
            if let Some(cache) = &spec.cache {
                let key = VariableSet::for_job(self.variables, ctx, job).expand(&cache.key);
                self.ledger.save(key, job.id, ctx.pipeline_id, now);
            }
        }

        if self.settings.enable_artifacts {
            if let Some(artifacts) = &spec.artifacts {
                let size_bytes = policy::artifact_size(ctx.pipeline_id, &job.name, &artifacts.paths);
                let id = self.ledger.upload(
                    ArtifactUpload {
                        job_id: job.id,
                        job_name: &job.name,
                        pipeline_id: ctx.pipeline_id,
                        paths: &artifacts.paths,
                        size_bytes,
                        expire_in: artifacts.expire_in,
                    },
                    now,
                );
                job.artifact_ids.push(id);
            }
        }

        if let Some(name) = &job.environment {
            let idx = match self.environments.iter().position(|e| &e.name == name) {
                Some(idx) => idx,
                None => {
                    self.environments.push(Environment::ad_hoc(name));
                    self.environments.len() - 1
                }
            };
            self.environments[idx].record(Deployment {
                pipeline_id: ctx.pipeline_id,
                job_id: job.id,
                job_name: job.name.clone(),
                git_ref: ctx.git_ref.to_string(),
                deployed_at: now,
            });
            info!(environment = %name, pipeline_id = ctx.pipeline_id, "deployment recorded");
        }
    }

    /// Bind pending jobs to runners, oldest first.
    ///
    /// A job with no eligible runner stays pending; that is backpressure, not
    /// an error.
    pub fn admit(
        &mut self,
        executions: &mut BTreeMap<PipelineId, PipelineExecution>,
        now: DateTime<Utc>,
        step: &mut DispatchStep,
    ) {
        if !self.settings.enable_runners {
            return;
        }

        let mut queue: Vec<(DateTime<Utc>, JobId, PipelineId)> = executions
            .values()
            .filter(|e| !e.is_terminal())
            .flat_map(|e| {
                e.jobs()
                    .filter(|j| j.status == JobStatus::Pending && !j.is_trigger())
                    .map(move |j| (j.queued_at.unwrap_or(now), j.id, e.id))
            })
            .collect();
        queue.sort();

        for (_, job_id, pipeline_id) in queue {
            let Some(exec) = executions.get_mut(&pipeline_id) else {
                continue;
            };
            let Some((si, ji)) = exec.locate(job_id) else {
                continue;
            };
            let ctx = PipelineContext {
                pipeline_id,
                iid: exec.iid,
                git_ref: &exec.git_ref,
                source: exec.source,
                template: &exec.template,
            };
            let job = &mut exec.stages[si].jobs[ji];
            let spec = Arc::clone(&job.spec);

            let Some(runner) = self.pool.acquire(&spec.tags) else {
                debug!(pipeline_id, job = %job.name, "no eligible runner; job stays pending");
                continue;
            };
            let runner_id = runner.id.clone();
            let profile = runner.profile.clone();

            let plan = policy::plan_job(PlanInput {
                pipeline_id,
                job_name: &job.name,
                attempt: job.attempt,
                duration: spec.duration.unwrap_or(self.settings.default_job_duration),
                startup: profile.startup,
                timeout: spec.timeout,
                fail_rate: spec.fail_rate.unwrap_or(profile.fail_rate),
            });

            if job.queue_wait.is_none() {
                job.queue_wait = job.queued_at.map(|q| now - q);
            }
            job.status = JobStatus::Running;
            job.runner_id = Some(runner_id);
            job.started_at = Some(now);
            job.duration = Some(plan.run_for);
            job.plan = Some(plan);

            if self.settings.enable_cache {
                if let Some(cache) = &spec.cache {
                    let key = VariableSet::for_job(self.variables, &ctx, job).expand(&cache.key);
                    job.cache = Some(self.ledger.restore(&key));
                }
            }

            info!(
                pipeline_id,
                job = %job.name,
                job_id,
                runner = job.runner_id.as_deref().unwrap_or_default(),
                attempt = job.attempt,
                "job started"
            );
            step.started.push(job_id);
        }
    }
}

/// Resolve trigger jobs whose child execution finished.
///
/// A child that no longer exists counts as a downstream failure. Returns the
/// number of trigger jobs resolved.
pub fn mirror_children(
    exec: &mut PipelineExecution,
    statuses: &HashMap<PipelineId, PipelineStatus>,
    now: DateTime<Utc>,
    step: &mut DispatchStep,
) -> usize {
    let pipeline_id = exec.id;
    let mut resolved = 0;
    for job in exec.jobs_mut() {
        if job.status != JobStatus::Running || !job.is_trigger() {
            continue;
        }
        let Some(child) = job.child_pipeline_id else {
            continue;
        };
        match statuses.get(&child) {
            Some(PipelineStatus::Success) => {
                job.finish(JobStatus::Success, now);
                step.succeeded.push(job.id);
            }
            Some(PipelineStatus::Canceled) => job.finish(JobStatus::Canceled, now),
            Some(PipelineStatus::Failed) | None => {
                job.failure_reason = Some(FailureReason::DownstreamFailed);
                job.finish(JobStatus::Failed, now);
                step.failed.push(job.id);
            }
            Some(_) => continue,
        }
        resolved += 1;
        debug!(pipeline_id, job = %job.name, child, status = %job.status, "trigger job mirrored child");
    }
    resolved
}

/// Open every stage that can open and evaluate `when` for its jobs.
///
/// Returns trigger jobs that became pending; the caller creates their child
/// executions.
pub fn open_stages(
    exec: &mut PipelineExecution,
    now: DateTime<Utc>,
    step: &mut DispatchStep,
) -> Vec<TriggerRequest> {
    let mut triggers = Vec::new();
    let pipeline_id = exec.id;

    loop {
        for stage in &mut exec.stages {
            stage.refresh();
        }
        let Some(idx) = exec.current_stage() else {
            break;
        };
        let upstream = exec.upstream(idx);
        let stage = &mut exec.stages[idx];

        for job in stage.jobs.iter_mut().filter(|j| j.status == JobStatus::Created) {
            match (job.when, upstream) {
                (when, upstream) if upstream.admits(when) => {
                    job.enqueue(now);
                    if let Some(target) = &job.spec.trigger {
                        triggers.push(TriggerRequest {
                            parent_id: pipeline_id,
                            job_id: job.id,
                            target: target.clone(),
                        });
                    }
                }
                (WhenPolicy::Manual, Upstream::Success) => {
                    job.status = JobStatus::Manual;
                    debug!(pipeline_id, job = %job.name, "manual job waiting to be played");
                }
                _ => {
                    job.finish(JobStatus::Skipped, now);
                    step.skipped.push(job.id);
                }
            }
        }

        // A failed stage with nothing left running cannot wait on manual jobs.
        if stage.refresh() == StageStatus::Failed && !stage.has_active_jobs() {
            for job in stage
                .jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Manual)
            {
                job.finish(JobStatus::Skipped, now);
                step.skipped.push(job.id);
            }
            stage.refresh();
        }

        if !stage.is_settled() {
            break;
        }
    }

    triggers
}
