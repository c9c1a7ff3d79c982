// src/engine/runtime.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::model::ConfigFile;
use crate::errors::{EngineError, Result};
use crate::ledger::Artifact;
use crate::logs::JobLog;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{DispatchStep, Job, PipelineExecution};
use crate::resources::{Environment, Variable};
use crate::runner::Runner;
use crate::schedule::Schedule;
use crate::types::{JobId, PipelineId, PipelineSource, TemplateId};

use super::core::{EngineStep, PipelineEngine};
use super::reconcile::ReconcileReport;

const REQUEST_BUFFER: usize = 64;

/// `{success, reason}` reply for commands.
///
/// Expected failures (unknown ids, conflicting state) are reported here rather
/// than as an `Err`; `Err` from a handle method means the actor is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub reason: Option<String>,
    /// Execution created by `start` or `retry`.
    pub pipeline_id: Option<PipelineId>,
}

impl From<Result<PipelineId>> for CommandOutcome {
    fn from(result: Result<PipelineId>) -> Self {
        match result {
            Ok(id) => Self {
                success: true,
                reason: None,
                pipeline_id: Some(id),
            },
            Err(err) => Self {
                success: false,
                reason: Some(err.to_string()),
                pipeline_id: None,
            },
        }
    }
}

impl From<Result<()>> for CommandOutcome {
    fn from(result: Result<()>) -> Self {
        Self {
            success: result.is_ok(),
            reason: result.err().map(|e| e.to_string()),
            pipeline_id: None,
        }
    }
}

type InspectFn = Box<dyn FnOnce(&PipelineEngine) + Send>;

/// Requests processed by the actor, one at a time.
pub enum EngineRequest {
    Step {
        now: DateTime<Utc>,
        reply: oneshot::Sender<EngineStep>,
    },
    Tick {
        now: DateTime<Utc>,
        reply: oneshot::Sender<DispatchStep>,
    },
    Start {
        template_id: TemplateId,
        source: PipelineSource,
        now: DateTime<Utc>,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Retry {
        pipeline_id: PipelineId,
        now: DateTime<Utc>,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Cancel {
        pipeline_id: PipelineId,
        reply: oneshot::Sender<CommandOutcome>,
    },
    PlayManualJob {
        job_id: JobId,
        now: DateTime<Utc>,
        reply: oneshot::Sender<CommandOutcome>,
    },
    EvaluateSchedules {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Vec<PipelineId>>,
    },
    UpdateConfig {
        config: Box<ConfigFile>,
        reply: oneshot::Sender<ReconcileReport>,
    },
    /// Read-only access at the serialization point.
    Inspect(InspectFn),
    Shutdown,
}

impl fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineRequest::Step { now, .. } => f.debug_struct("Step").field("now", now).finish(),
            EngineRequest::Tick { now, .. } => f.debug_struct("Tick").field("now", now).finish(),
            EngineRequest::Start {
                template_id,
                source,
                now,
                ..
            } => f
                .debug_struct("Start")
                .field("template_id", template_id)
                .field("source", source)
                .field("now", now)
                .finish(),
            EngineRequest::Retry { pipeline_id, now, .. } => f
                .debug_struct("Retry")
                .field("pipeline_id", pipeline_id)
                .field("now", now)
                .finish(),
            EngineRequest::Cancel { pipeline_id, .. } => f
                .debug_struct("Cancel")
                .field("pipeline_id", pipeline_id)
                .finish(),
            EngineRequest::PlayManualJob { job_id, now, .. } => f
                .debug_struct("PlayManualJob")
                .field("job_id", job_id)
                .field("now", now)
                .finish(),
            EngineRequest::EvaluateSchedules { now, .. } => f
                .debug_struct("EvaluateSchedules")
                .field("now", now)
                .finish(),
            EngineRequest::UpdateConfig { .. } => f.write_str("UpdateConfig"),
            EngineRequest::Inspect(_) => f.write_str("Inspect"),
            EngineRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Owns the engine and applies requests in arrival order.
///
/// This is the IO shell around [`PipelineEngine`]: every mutation and every
/// read goes through the request channel, so callers never observe a
/// half-applied tick.
pub struct EngineActor {
    engine: PipelineEngine,
    rx: mpsc::Receiver<EngineRequest>,
}

impl fmt::Debug for EngineActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineActor")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl EngineActor {
    pub fn new(engine: PipelineEngine, rx: mpsc::Receiver<EngineRequest>) -> Self {
        Self { engine, rx }
    }

    /// Main loop. Returns the engine once every handle is dropped or a
    /// shutdown is requested.
    pub async fn run(mut self) -> PipelineEngine {
        info!("engine actor started");

        while let Some(request) = self.rx.recv().await {
            debug!(?request, "engine actor received request");
            if !self.handle(request) {
                info!("shutdown requested; stopping engine actor");
                break;
            }
        }

        info!("engine actor exiting");
        self.engine
    }

    /// Apply one request. Returns `false` to stop.
    ///
    /// A dropped reply receiver only means the caller stopped waiting.
    fn handle(&mut self, request: EngineRequest) -> bool {
        let engine = &mut self.engine;
        match request {
            EngineRequest::Step { now, reply } => {
                let _ = reply.send(engine.step(now));
            }
            EngineRequest::Tick { now, reply } => {
                let _ = reply.send(engine.tick(now));
            }
            EngineRequest::Start {
                template_id,
                source,
                now,
                reply,
            } => {
                let _ = reply.send(engine.start(&template_id, now, source).into());
            }
            EngineRequest::Retry {
                pipeline_id,
                now,
                reply,
            } => {
                let _ = reply.send(engine.retry(pipeline_id, now).into());
            }
            EngineRequest::Cancel { pipeline_id, reply } => {
                let _ = reply.send(engine.cancel(pipeline_id).into());
            }
            EngineRequest::PlayManualJob { job_id, now, reply } => {
                let _ = reply.send(engine.play_manual_job(job_id, now).into());
            }
            EngineRequest::EvaluateSchedules { now, reply } => {
                let _ = reply.send(engine.evaluate_schedules(now));
            }
            EngineRequest::UpdateConfig { config, reply } => {
                let _ = reply.send(engine.update_config(*config));
            }
            EngineRequest::Inspect(f) => f(engine),
            EngineRequest::Shutdown => return false,
        }
        true
    }
}

/// Clonable handle to a running [`EngineActor`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Spawn an actor for `engine` on the current Tokio runtime.
    pub fn spawn(engine: PipelineEngine) -> (Self, JoinHandle<PipelineEngine>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let join = tokio::spawn(EngineActor::new(engine, rx).run());
        (Self { tx }, join)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        rx.await.map_err(|_| EngineError::EngineClosed)
    }

    pub async fn step(&self, now: DateTime<Utc>) -> Result<EngineStep> {
        self.request(|reply| EngineRequest::Step { now, reply }).await
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DispatchStep> {
        self.request(|reply| EngineRequest::Tick { now, reply }).await
    }

    pub async fn start(
        &self,
        template_id: impl Into<TemplateId>,
        source: PipelineSource,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let template_id = template_id.into();
        self.request(|reply| EngineRequest::Start {
            template_id,
            source,
            now,
            reply,
        })
        .await
    }

    pub async fn retry(&self, pipeline_id: PipelineId, now: DateTime<Utc>) -> Result<CommandOutcome> {
        self.request(|reply| EngineRequest::Retry {
            pipeline_id,
            now,
            reply,
        })
        .await
    }

    pub async fn cancel(&self, pipeline_id: PipelineId) -> Result<CommandOutcome> {
        self.request(|reply| EngineRequest::Cancel { pipeline_id, reply })
            .await
    }

    pub async fn play_manual_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<CommandOutcome> {
        self.request(|reply| EngineRequest::PlayManualJob { job_id, now, reply })
            .await
    }

    pub async fn evaluate_schedules(&self, now: DateTime<Utc>) -> Result<Vec<PipelineId>> {
        self.request(|reply| EngineRequest::EvaluateSchedules { now, reply })
            .await
    }

    pub async fn update_config(&self, config: ConfigFile) -> Result<ReconcileReport> {
        let config = Box::new(config);
        self.request(|reply| EngineRequest::UpdateConfig { config, reply })
            .await
    }

    /// Run `f` against the engine at the serialization point.
    pub async fn inspect<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&PipelineEngine) -> T + Send + 'static,
    {
        self.request(|reply| {
            EngineRequest::Inspect(Box::new(move |engine| {
                let _ = reply.send(f(engine));
            }))
        })
        .await
    }

    pub async fn list_pipelines(&self) -> Result<Vec<PipelineExecution>> {
        self.inspect(|e| e.list_pipelines().cloned().collect()).await
    }

    pub async fn pipeline(&self, id: PipelineId) -> Result<PipelineExecution> {
        self.inspect(move |e| e.pipeline(id).cloned()).await?
    }

    pub async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        self.inspect(|e| e.list_active_jobs().cloned().collect()).await
    }

    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        self.inspect(|e| e.list_runners().to_vec()).await
    }

    pub async fn list_variables(&self) -> Result<Vec<Variable>> {
        self.inspect(|e| e.list_variables().to_vec()).await
    }

    pub async fn list_environments(&self) -> Result<Vec<Environment>> {
        self.inspect(|e| e.list_environments().to_vec()).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.inspect(|e| e.list_schedules().to_vec()).await
    }

    pub async fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        self.inspect(|e| e.list_artifacts().to_vec()).await
    }

    pub async fn metrics_snapshot(&self) -> Result<MetricsSnapshot> {
        self.inspect(PipelineEngine::metrics_snapshot).await
    }

    pub async fn job_logs(&self, job_id: JobId) -> Result<JobLog> {
        self.inspect(move |e| e.job_logs(job_id)).await?
    }

    /// Ask the actor to stop after the requests already queued.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(EngineRequest::Shutdown)
            .await
            .map_err(|_| EngineError::EngineClosed)
    }
}
