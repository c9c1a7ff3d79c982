// src/metrics/snapshot.rs

//! The metrics snapshot: a pure function of engine state at call time.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::ledger::Ledger;
use crate::metrics::aggregate::{mean, percentile, ratio, success_rate};
use crate::pipeline::PipelineExecution;
use crate::runner::Runner;
use crate::schedule::Schedule;
use crate::types::{JobStatus, PipelineStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineCounts {
    pub total: usize,
    pub created: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub created: usize,
    pub pending: usize,
    pub running: usize,
    /// Manual jobs waiting to be played.
    pub manual: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
    pub skipped: usize,
}

/// Duration percentiles in seconds; `None` without samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationStats {
    pub samples: usize,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl DurationStats {
    fn from_samples(samples: &[f64]) -> Self {
        Self {
            samples: samples.len(),
            p50: percentile(50.0, samples),
            p90: percentile(90.0, samples),
            p95: percentile(95.0, samples),
            p99: percentile(99.0, samples),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerUtilization {
    pub id: String,
    pub current_jobs: usize,
    pub max_jobs: usize,
    pub utilization: f64,
    pub retiring: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactStats {
    pub count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleStats {
    pub active: usize,
    pub fired: u64,
    pub skipped: u64,
}

/// Derived, point-in-time aggregate. Never stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub pipelines: PipelineCounts,
    pub jobs: JobCounts,
    /// Successes over successes plus failures among terminal executions.
    pub success_rate: f64,
    pub pipeline_duration: DurationStats,
    pub job_duration: DurationStats,
    /// Mean seconds a job waited pending before its first bind.
    pub avg_queue_wait: Option<f64>,
    pub runners: Vec<RunnerUtilization>,
    /// `Σcurrent_jobs / Σmax_jobs` over all runners.
    pub overall_utilization: f64,
    pub cache: CacheStats,
    pub artifacts: ArtifactStats,
    pub schedules: ScheduleStats,
    /// Executions that finished within the hour before `generated_at`.
    pub finished_last_hour: usize,
}

/// Borrowed engine state the snapshot is computed from.
pub struct MetricsInput<'a, I> {
    pub executions: I,
    pub runners: &'a [Runner],
    pub ledger: &'a Ledger,
    pub schedules: &'a [Schedule],
    pub now: DateTime<Utc>,
}

pub fn compute<'a, I>(input: MetricsInput<'a, I>) -> MetricsSnapshot
where
    I: Iterator<Item = &'a PipelineExecution>,
{
    let now = input.now;
    let hour_ago = now - TimeDelta::hours(1);

    let mut pipelines = PipelineCounts::default();
    let mut jobs = JobCounts::default();
    let mut pipeline_durations = Vec::new();
    let mut job_durations = Vec::new();
    let mut queue_waits = Vec::new();
    let mut finished_last_hour = 0;

    for exec in input.executions {
        pipelines.total += 1;
        match exec.status {
            PipelineStatus::Created => pipelines.created += 1,
            PipelineStatus::Pending => pipelines.pending += 1,
            PipelineStatus::Running => pipelines.running += 1,
            PipelineStatus::Success => pipelines.success += 1,
            PipelineStatus::Failed => pipelines.failed += 1,
            PipelineStatus::Canceled => pipelines.canceled += 1,
        }
        if exec.is_terminal() {
            if let Some(d) = exec.duration {
                pipeline_durations.push(secs(d));
            }
            if exec.finished_at.is_some_and(|t| t > hour_ago && t <= now) {
                finished_last_hour += 1;
            }
        }

        for job in exec.jobs() {
            jobs.total += 1;
            match job.status {
                JobStatus::Created => jobs.created += 1,
                JobStatus::Pending => jobs.pending += 1,
                JobStatus::Running => jobs.running += 1,
                JobStatus::Manual => jobs.manual += 1,
                JobStatus::Success => jobs.success += 1,
                JobStatus::Failed => jobs.failed += 1,
                JobStatus::Canceled => jobs.canceled += 1,
                JobStatus::Skipped => jobs.skipped += 1,
            }
            if matches!(job.status, JobStatus::Success | JobStatus::Failed) {
                if let Some(elapsed) = job.elapsed(now) {
                    job_durations.push(secs(elapsed));
                }
            }
            if let Some(wait) = job.queue_wait {
                queue_waits.push(secs(wait));
            }
        }
    }

    let runners: Vec<RunnerUtilization> = input
        .runners
        .iter()
        .map(|r| RunnerUtilization {
            id: r.id.clone(),
            current_jobs: r.current_jobs,
            max_jobs: r.max_jobs,
            utilization: r.utilization(),
            retiring: r.retiring,
        })
        .collect();
    let total_current: usize = input.runners.iter().map(|r| r.current_jobs).sum();
    let total_max: usize = input.runners.iter().map(|r| r.max_jobs).sum();

    let hits = input.ledger.cache_hits();
    let misses = input.ledger.cache_misses();

    MetricsSnapshot {
        generated_at: now,
        success_rate: success_rate(pipelines.success, pipelines.failed),
        pipelines,
        jobs,
        pipeline_duration: DurationStats::from_samples(&pipeline_durations),
        job_duration: DurationStats::from_samples(&job_durations),
        avg_queue_wait: mean(&queue_waits),
        runners,
        overall_utilization: ratio(total_current as f64, total_max as f64),
        cache: CacheStats {
            hits,
            misses,
            hit_rate: ratio(hits as f64, (hits + misses) as f64),
        },
        artifacts: ArtifactStats {
            count: input.ledger.artifacts().len(),
            total_bytes: input.ledger.artifact_bytes(),
        },
        schedules: ScheduleStats {
            active: input.schedules.iter().filter(|s| s.active).count(),
            fired: input.schedules.iter().map(|s| s.fired).sum(),
            skipped: input.schedules.iter().map(|s| s.skipped).sum(),
        },
        finished_last_hour,
    }
}

fn secs(d: TimeDelta) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}
