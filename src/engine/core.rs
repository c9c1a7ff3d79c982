// src/engine/core.rs

//! Pure core engine state machine.
//!
//! [`PipelineEngine`] owns every piece of mutable simulation state: templates,
//! the runner pool, schedules, live executions and the artifact/cache ledger.
//! It has no channels, no Tokio types and performs no IO; the caller passes
//! the current time into every time-dependent operation. The async shell in
//! [`crate::engine::runtime`] serializes access to it.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::model::{ConfigFile, Settings};
use crate::errors::{EngineError, EntityKind, Result};
use crate::ledger::{Artifact, Ledger};
use crate::logs::JobLog;
use crate::metrics::snapshot::{self, MetricsInput};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::dispatcher::{mirror_children, open_stages};
use crate::pipeline::variables::{PipelineContext, VariableSet};
use crate::pipeline::{DispatchStep, Dispatcher, Job, PipelineExecution, TemplateStore};
use crate::resources::{Environment, Variable};
use crate::runner::{Runner, RunnerPool};
use crate::schedule::Schedule;
use crate::types::{JobId, PipelineId, PipelineStatus};

/// Result of one full engine step: schedules evaluated, then a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStep {
    /// Executions started by schedules during this step.
    pub fired: Vec<PipelineId>,
    pub dispatch: DispatchStep,
}

/// Single-writer simulation state.
#[derive(Debug)]
pub struct PipelineEngine {
    pub(crate) settings: Settings,
    pub(crate) templates: TemplateStore,
    pub(crate) pool: RunnerPool,
    pub(crate) schedules: Vec<Schedule>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) environments: Vec<Environment>,
    pub(crate) executions: BTreeMap<PipelineId, PipelineExecution>,
    pub(crate) job_index: HashMap<JobId, PipelineId>,
    pub(crate) ledger: Ledger,
    /// Latest time observed through any time-carrying operation.
    pub(crate) now: DateTime<Utc>,
    pub(crate) next_pipeline_id: PipelineId,
    pub(crate) next_iid: u64,
    pub(crate) next_job_id: JobId,
}

impl PipelineEngine {
    pub fn new(config: ConfigFile) -> Self {
        let ConfigFile {
            settings,
            variables,
            environments,
            runners,
            pipelines,
            schedules,
        } = config;

        info!(
            templates = pipelines.len(),
            runners = runners.len(),
            schedules = schedules.len(),
            "pipeline engine initialised"
        );

        Self {
            settings,
            templates: TemplateStore::new(pipelines),
            pool: RunnerPool::from_specs(&runners),
            schedules: schedules.iter().map(Schedule::from_spec).collect(),
            variables,
            environments: environments.iter().map(Environment::from_spec).collect(),
            executions: BTreeMap::new(),
            job_index: HashMap::new(),
            ledger: Ledger::new(),
            now: DateTime::<Utc>::UNIX_EPOCH,
            next_pipeline_id: 1,
            next_iid: 1,
            next_job_id: 1,
        }
    }

    /// The engine clock never moves backwards.
    pub(crate) fn observe(&mut self, now: DateTime<Utc>) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Advance the simulation to `now`.
    ///
    /// Running jobs whose synthetic time is up resolve first, releasing
    /// their runners; then every execution opens whatever stages it can;
    /// finally pending jobs bind to runners in one global FIFO pass.
    pub fn tick(&mut self, now: DateTime<Utc>) -> DispatchStep {
        self.observe(now);
        let mut step = DispatchStep::default();

        let expired = self.ledger.expire(now);
        if expired > 0 {
            debug!(expired, "artifacts expired");
        }

        let mut dispatcher = Dispatcher {
            settings: &self.settings,
            pool: &mut self.pool,
            ledger: &mut self.ledger,
            environments: &mut self.environments,
            variables: &self.variables,
        };
        for exec in self.executions.values_mut().filter(|e| !e.is_terminal()) {
            dispatcher.retire(exec, now, &mut step);
        }

        self.settle(now, &mut step);
        step
    }

    /// Evaluate schedules, then tick.
    pub fn step(&mut self, now: DateTime<Utc>) -> EngineStep {
        let fired = self.evaluate_schedules(now);
        let dispatch = self.tick(now);
        EngineStep { fired, dispatch }
    }

    /// Everything after retirement: advance, admit, record and prune.
    pub(crate) fn settle(&mut self, now: DateTime<Utc>, step: &mut DispatchStep) {
        let already_terminal = self.terminal_ids();
        self.advance(now, step);

        let mut dispatcher = Dispatcher {
            settings: &self.settings,
            pool: &mut self.pool,
            ledger: &mut self.ledger,
            environments: &mut self.environments,
            variables: &self.variables,
        };
        dispatcher.admit(&mut self.executions, now, step);

        for exec in self.executions.values_mut() {
            if already_terminal.contains(&exec.id) {
                continue;
            }
            if exec.refresh(now).is_terminal() {
                info!(
                    pipeline_id = exec.id,
                    iid = exec.iid,
                    template = %exec.template_id,
                    status = %exec.status,
                    "pipeline finished"
                );
                step.finished_pipelines.push(exec.id);
            }
        }

        self.prune(step);
    }

    /// Mirror finished children and open stages until nothing moves.
    ///
    /// Each pass may spawn child executions (whose first stage opens on the
    /// next pass) or resolve trigger jobs (which may let their stage settle).
    pub(crate) fn advance(&mut self, now: DateTime<Utc>, step: &mut DispatchStep) {
        let mut previous: Option<HashMap<PipelineId, PipelineStatus>> = None;
        loop {
            let statuses: HashMap<PipelineId, PipelineStatus> = self
                .executions
                .iter_mut()
                .map(|(id, e)| {
                    let status = if e.is_terminal() { e.status } else { e.refresh(now) };
                    (*id, status)
                })
                .collect();

            let mut moved = previous.as_ref() != Some(&statuses);
            let mut requests = Vec::new();
            for exec in self.executions.values_mut().filter(|e| !e.is_terminal()) {
                moved |= mirror_children(exec, &statuses, now, step) > 0;
                requests.extend(open_stages(exec, now, step));
            }

            moved |= !requests.is_empty();
            for request in requests {
                self.spawn_child(request, now, step);
            }

            if !moved {
                break;
            }
            previous = Some(statuses);
        }
    }

    fn terminal_ids(&self) -> HashSet<PipelineId> {
        self.executions
            .values()
            .filter(|e| e.is_terminal())
            .map(|e| e.id)
            .collect()
    }

    /// Drop the oldest terminal executions beyond `history_limit`.
    ///
    /// A terminal child whose parent is still running is kept so the parent
    /// can mirror it.
    fn prune(&mut self, step: &mut DispatchStep) {
        let Some(limit) = self.settings.history_limit else {
            return;
        };
        let terminal: Vec<PipelineId> = self
            .executions
            .values()
            .filter(|e| e.is_terminal())
            .filter(|e| {
                e.parent_pipeline_id
                    .and_then(|p| self.executions.get(&p))
                    .is_none_or(PipelineExecution::is_terminal)
            })
            .map(|e| e.id)
            .collect();
        let total_terminal = self.executions.values().filter(|e| e.is_terminal()).count();
        let excess = total_terminal.saturating_sub(limit).min(terminal.len());

        for id in terminal.into_iter().take(excess) {
            if let Some(exec) = self.executions.remove(&id) {
                for job in exec.jobs() {
                    self.job_index.remove(&job.id);
                }
                debug!(pipeline_id = id, "pruned pipeline from history");
                step.pruned.push(id);
            }
        }
    }

    pub(crate) fn alloc_pipeline_id(&mut self) -> PipelineId {
        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        id
    }

    pub(crate) fn alloc_iid(&mut self) -> u64 {
        let iid = self.next_iid;
        self.next_iid += 1;
        iid
    }

    pub(crate) fn alloc_job_id(&mut self) -> JobId {
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    // ---- read accessors ----

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Executions in id order.
    pub fn list_pipelines(&self) -> impl Iterator<Item = &PipelineExecution> {
        self.executions.values()
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<&PipelineExecution> {
        self.executions
            .get(&id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Pipeline, id))
    }

    pub fn job(&self, id: JobId) -> Result<&Job> {
        self.job_index
            .get(&id)
            .and_then(|pid| self.executions.get(pid))
            .and_then(|exec| exec.job(id))
            .ok_or_else(|| EngineError::not_found(EntityKind::Job, id))
    }

    /// Pending and running jobs across all executions.
    pub fn list_active_jobs(&self) -> impl Iterator<Item = &Job> {
        self.executions
            .values()
            .flat_map(|e| e.jobs())
            .filter(|j| j.status.is_active())
    }

    pub fn list_runners(&self) -> &[Runner] {
        self.pool.runners()
    }

    pub fn list_variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn list_environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn list_schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn list_artifacts(&self) -> &[Artifact] {
        self.ledger.artifacts()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        snapshot::compute(MetricsInput {
            executions: self.executions.values(),
            runners: self.pool.runners(),
            ledger: &self.ledger,
            schedules: &self.schedules,
            now: self.now,
        })
    }

    /// Snapshot a job for log rendering.
    pub fn job_logs(&self, job_id: JobId) -> Result<JobLog> {
        let exec = self
            .job_index
            .get(&job_id)
            .and_then(|pid| self.executions.get(pid))
            .ok_or_else(|| EngineError::not_found(EntityKind::Job, job_id))?;
        let job = exec
            .job(job_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Job, job_id))?;

        let ctx = PipelineContext {
            pipeline_id: exec.id,
            iid: exec.iid,
            git_ref: &exec.git_ref,
            source: exec.source,
            template: &exec.template,
        };
        let executor = job
            .runner_id
            .as_deref()
            .and_then(|r| self.pool.get(r))
            .map(|r| r.profile.clone());

        Ok(JobLog {
            job: job.clone(),
            pipeline_id: exec.id,
            git_ref: exec.git_ref.clone(),
            source: exec.source,
            executor,
            variables: VariableSet::for_job(&self.variables, &ctx, job),
            now: self.now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{ConfigFormat, validate_str};
    use crate::types::{JobStatus, PipelineSource};
    use chrono::{TimeDelta, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn engine(src: &str) -> PipelineEngine {
        PipelineEngine::new(validate_str(src, ConfigFormat::Toml).unwrap())
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut engine = engine("");
        engine.observe(at(100));
        engine.observe(at(50));
        assert_eq!(engine.now(), at(100));

        engine.tick(at(10));
        assert_eq!(engine.now(), at(100));
    }

    #[test]
    fn settled_stages_open_the_next_in_the_same_tick() {
        let mut engine = engine(
            r#"
            [[runner]]
            id = "r1"

            [[pipeline]]
            id = "main"
            [[pipeline.stage]]
            name = "build"
            [[pipeline.stage.job]]
            name = "compile"
            duration = "1m"
            fail_rate = 1.0
            [[pipeline.stage]]
            name = "ship"
            [[pipeline.stage.job]]
            name = "release"
            [[pipeline.stage]]
            name = "cleanup"
            [[pipeline.stage.job]]
            name = "rollback"
            when = "on_failure"
            "#,
        );
        let id = engine.start("main", at(0), PipelineSource::Push).unwrap();
        let step = engine.tick(at(60));

        let exec = engine.pipeline(id).unwrap();
        let status = |name: &str| exec.jobs().find(|j| j.name == name).unwrap().status;
        assert_eq!(status("release"), JobStatus::Skipped);
        assert_eq!(status("rollback"), JobStatus::Running);
        assert_eq!(step.skipped.len(), 1);
        assert_eq!(step.started.len(), 1);
    }

    #[test]
    fn prune_keeps_children_of_running_parents() {
        let mut engine = engine(
            r#"
            [settings]
            history_limit = 1

            [[runner]]
            id = "r1"
            max_jobs = 4

            [[pipeline]]
            id = "solo"
            [[pipeline.stage]]
            name = "build"
            [[pipeline.stage.job]]
            name = "compile"
            duration = "1m"

            [[pipeline]]
            id = "main"
            [[pipeline.stage]]
            name = "downstream"
            [[pipeline.stage.job]]
            name = "kick"
            trigger = "child"
            [[pipeline.stage]]
            name = "after"
            [[pipeline.stage.job]]
            name = "wait"
            duration = "10m"

            [[pipeline]]
            id = "child"
            [[pipeline.stage]]
            name = "run"
            [[pipeline.stage.job]]
            name = "quick"
            duration = "1m"
            "#,
        );
        let solo = engine.start("solo", at(0), PipelineSource::Push).unwrap();
        let parent = engine.start("main", at(0), PipelineSource::Push).unwrap();
        let child = engine.pipeline(parent).unwrap().child_pipeline_ids[0];

        let step = engine.tick(at(60));
        assert_eq!(step.pruned, vec![solo]);
        assert!(engine.pipeline(child).unwrap().is_terminal());
        assert!(!engine.pipeline(parent).unwrap().is_terminal());
        assert!(engine.executions.contains_key(&child));
        assert!(!engine.job_index.values().any(|p| *p == solo));
    }
}
