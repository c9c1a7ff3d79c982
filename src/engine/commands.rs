// src/engine/commands.rs

//! Commands that create, retry, cancel and unblock executions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::engine::core::PipelineEngine;
use crate::errors::{EngineError, EntityKind, Result};
use crate::pipeline::{
    DispatchStep, Job, PipelineExecution, PipelineTemplate, Stage, TriggerRequest,
};
use crate::types::{
    FailureReason, JobId, JobStatus, PipelineId, PipelineSource, PipelineStatus, ScheduleId,
    StageStatus, WhenPolicy,
};

/// Everything that distinguishes one new execution from another.
struct Launch {
    template: Arc<PipelineTemplate>,
    git_ref: String,
    source: PipelineSource,
    /// Reused by retries; fresh otherwise.
    iid: Option<u64>,
    attempt: u32,
    parent: Option<PipelineId>,
    schedule_id: Option<ScheduleId>,
}

impl PipelineEngine {
    /// Create an execution of `template_id` and dispatch it immediately.
    pub fn start(
        &mut self,
        template_id: &str,
        now: DateTime<Utc>,
        source: PipelineSource,
    ) -> Result<PipelineId> {
        self.observe(now);
        let template = self
            .templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::Template, template_id))?;

        let id = self.create_execution(Launch {
            git_ref: template.git_ref.clone(),
            template,
            source,
            iid: None,
            attempt: 1,
            parent: None,
            schedule_id: None,
        })?;

        self.settle(now, &mut DispatchStep::default());
        Ok(id)
    }

    /// Start a fresh attempt of a finished execution.
    ///
    /// The new execution shares the `iid`, parent and template snapshot of
    /// the old one; its jobs start from scratch.
    pub fn retry(&mut self, pipeline_id: PipelineId, now: DateTime<Utc>) -> Result<PipelineId> {
        self.observe(now);
        let old = self.pipeline(pipeline_id)?;
        if !old.is_terminal() {
            return Err(EngineError::conflict(format!(
                "pipeline {pipeline_id} is {} and cannot be retried until it finishes",
                old.status
            )));
        }

        let iid = old.iid;
        let attempt = self
            .executions
            .values()
            .filter(|e| e.iid == iid)
            .map(|e| e.attempt)
            .max()
            .unwrap_or(old.attempt)
            + 1;
        let launch = Launch {
            template: Arc::clone(&old.template),
            git_ref: old.git_ref.clone(),
            source: old.source,
            iid: Some(iid),
            attempt,
            parent: old.parent_pipeline_id,
            schedule_id: old.schedule_id.clone(),
        };

        let id = self.create_execution(launch)?;
        if let Some(old) = self.executions.get_mut(&pipeline_id) {
            old.retried_by = Some(id);
        }
        info!(pipeline_id = id, retry_of = pipeline_id, iid, attempt, "pipeline retried");

        self.settle(now, &mut DispatchStep::default());
        Ok(id)
    }

    /// Cancel an execution and, transitively, its running children.
    ///
    /// Uses the latest observed time; cancel carries no clock of its own.
    pub fn cancel(&mut self, pipeline_id: PipelineId) -> Result<()> {
        let exec = self.pipeline(pipeline_id)?;
        if exec.is_terminal() {
            return Err(EngineError::conflict(format!(
                "pipeline {pipeline_id} already finished with status {}",
                exec.status
            )));
        }
        self.cancel_tree(pipeline_id);
        Ok(())
    }

    pub(crate) fn cancel_tree(&mut self, root: PipelineId) -> Vec<PipelineId> {
        let now = self.now;
        let mut canceled = Vec::new();
        let mut queue = vec![root];

        while let Some(id) = queue.pop() {
            let Some(exec) = self.executions.get_mut(&id) else {
                continue;
            };
            if exec.is_terminal() {
                continue;
            }

            for job in exec.jobs_mut().filter(|j| !j.status.is_terminal()) {
                if job.status == JobStatus::Running && !job.is_trigger() {
                    if let Some(runner) = &job.runner_id {
                        self.pool.release(runner);
                    }
                }
                if let Some(child) = job.child_pipeline_id {
                    queue.push(child);
                }
                job.finish(JobStatus::Canceled, now);
            }
            queue.extend(exec.child_pipeline_ids.iter().copied());

            exec.status = PipelineStatus::Canceled;
            exec.refresh(now);
            exec.mark_finished(now);
            info!(pipeline_id = id, "pipeline canceled");
            canceled.push(id);
        }
        canceled
    }

    /// Release a manual job so it binds on the next tick.
    pub fn play_manual_job(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<()> {
        self.observe(now);
        let exec = self
            .job_index
            .get(&job_id)
            .and_then(|pid| self.executions.get_mut(pid))
            .ok_or_else(|| EngineError::not_found(EntityKind::Job, job_id))?;
        let pipeline_id = exec.id;
        if exec.is_terminal() {
            return Err(EngineError::conflict(format!(
                "pipeline {pipeline_id} already finished with status {}",
                exec.status
            )));
        }
        let job = exec
            .job_mut(job_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Job, job_id))?;

        if job.when != WhenPolicy::Manual {
            return Err(EngineError::conflict(format!(
                "job {} is not a manual job",
                job.name
            )));
        }
        match job.status {
            JobStatus::Manual => {}
            JobStatus::Created => {
                return Err(EngineError::conflict(format!(
                    "job {} cannot be played before its stage starts",
                    job.name
                )));
            }
            other => {
                return Err(EngineError::conflict(format!(
                    "job {} is {other} and cannot be played",
                    job.name
                )));
            }
        }

        job.enqueue(now);
        info!(pipeline_id, job = %job.name, job_id, "manual job played");
        exec.refresh(now);
        Ok(())
    }

    /// Fire every due schedule. Returns the executions started.
    ///
    /// A schedule whose previous execution is still running skips this fire
    /// time; either way the next fire time moves past `now`.
    pub fn evaluate_schedules(&mut self, now: DateTime<Utc>) -> Vec<PipelineId> {
        self.observe(now);
        let mut fired = Vec::new();

        for idx in 0..self.schedules.len() {
            let schedule = &mut self.schedules[idx];
            if !schedule.active || !schedule.is_due(now) {
                continue;
            }
            let schedule_id = schedule.id.clone();
            let template_id = schedule.template_id.clone();
            let git_ref = schedule.git_ref.clone();

            let still_running = self
                .executions
                .values()
                .any(|e| e.schedule_id.as_ref() == Some(&schedule_id) && !e.is_terminal());
            if still_running {
                info!(schedule = %schedule_id, "previous scheduled pipeline still running; skipping");
                self.schedules[idx].mark_skipped(now);
                continue;
            }

            let Some(template) = self.templates.get(&template_id).cloned() else {
                warn!(schedule = %schedule_id, template = %template_id, "schedule references unknown template");
                self.schedules[idx].mark_skipped(now);
                continue;
            };

            let launch = Launch {
                git_ref: git_ref.unwrap_or_else(|| template.git_ref.clone()),
                template,
                source: PipelineSource::Schedule,
                iid: None,
                attempt: 1,
                parent: None,
                schedule_id: Some(schedule_id.clone()),
            };
            match self.create_execution(launch) {
                Ok(pipeline_id) => {
                    info!(schedule = %schedule_id, pipeline_id, "schedule fired");
                    self.schedules[idx].mark_fired(now, pipeline_id);
                    fired.push(pipeline_id);
                }
                Err(err) => {
                    warn!(schedule = %schedule_id, error = %err, "schedule could not start pipeline");
                    self.schedules[idx].mark_skipped(now);
                }
            }
        }

        if !fired.is_empty() {
            self.settle(now, &mut DispatchStep::default());
        }
        fired
    }

    /// Create the child execution for a trigger job that became pending.
    ///
    /// A missing template or one with no jobs for the parent's ref fails the
    /// trigger job instead of the whole tick.
    pub(crate) fn spawn_child(
        &mut self,
        request: TriggerRequest,
        now: DateTime<Utc>,
        step: &mut DispatchStep,
    ) {
        let TriggerRequest {
            parent_id,
            job_id,
            target,
        } = request;
        let Some(git_ref) = self.executions.get(&parent_id).map(|e| e.git_ref.clone()) else {
            return;
        };

        let created = match self.templates.get(&target).cloned() {
            Some(template) => self.create_execution(Launch {
                template,
                git_ref,
                source: PipelineSource::ParentPipeline,
                iid: None,
                attempt: 1,
                parent: Some(parent_id),
                schedule_id: None,
            }),
            None => Err(EngineError::not_found(EntityKind::Template, &target)),
        };

        let Some(parent) = self.executions.get_mut(&parent_id) else {
            return;
        };
        let Some(job) = parent.job_mut(job_id) else {
            return;
        };

        match created {
            Ok(child) => {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                job.child_pipeline_id = Some(child);
                parent.child_pipeline_ids.push(child);
                info!(pipeline_id = parent_id, child, template = %target, "downstream pipeline created");
                step.child_pipelines.push(child);
            }
            Err(err) => {
                warn!(pipeline_id = parent_id, job_id, template = %target, error = %err, "trigger failed");
                job.failure_reason = Some(FailureReason::TriggerFailed);
                job.finish(JobStatus::Failed, now);
                step.failed.push(job_id);
            }
        }
    }

    fn create_execution(&mut self, launch: Launch) -> Result<PipelineId> {
        let Launch {
            template,
            git_ref,
            source,
            iid,
            attempt,
            parent,
            schedule_id,
        } = launch;

        if !template.jobs().any(|j| j.applies_to(&git_ref)) {
            return Err(EngineError::conflict(format!(
                "no jobs of template {} apply to ref {git_ref}",
                template.id
            )));
        }

        let id = self.alloc_pipeline_id();
        let iid = match iid {
            Some(iid) => iid,
            None => self.alloc_iid(),
        };

        let mut stages = Vec::with_capacity(template.stages.len());
        for stage in &template.stages {
            let mut jobs = Vec::new();
            for spec in stage.jobs.iter().filter(|j| j.applies_to(&git_ref)) {
                let job = Job::new(self.alloc_job_id(), id, Arc::clone(spec));
                self.job_index.insert(job.id, id);
                jobs.push(job);
            }
            if !jobs.is_empty() {
                stages.push(Stage {
                    name: stage.name.clone(),
                    status: StageStatus::Created,
                    jobs,
                });
            }
        }

        if let Some(parent) = parent.and_then(|p| self.executions.get_mut(&p)) {
            if attempt > 1 {
                parent.child_pipeline_ids.push(id);
            }
        }

        debug!(
            pipeline_id = id,
            iid,
            attempt,
            template = %template.id,
            git_ref = %git_ref,
            %source,
            stages = stages.len(),
            "pipeline created"
        );

        self.executions.insert(
            id,
            PipelineExecution {
                id,
                iid,
                template_id: template.id.clone(),
                git_ref,
                source,
                attempt,
                status: PipelineStatus::Created,
                stages,
                parent_pipeline_id: parent,
                child_pipeline_ids: Vec::new(),
                schedule_id,
                created_at: self.now,
                started_at: None,
                finished_at: None,
                duration: None,
                retried_by: None,
                template,
            },
        );
        Ok(id)
    }
}
