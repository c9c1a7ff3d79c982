// src/logs.rs

//! Synthetic job logs.
//!
//! A [`JobLog`] is a snapshot of one job taken at the serialization point.
//! Lines are generated lazily by [`JobLog::lines`]; every call starts a fresh
//! iterator over the same finite sequence.

use chrono::{DateTime, Utc};

use crate::pipeline::variables::VariableSet;
use crate::pipeline::Job;
use crate::runner::ExecutorProfile;
use crate::types::{CacheOutcome, JobStatus, PipelineId, PipelineSource};

/// Everything needed to render one job's log.
#[derive(Debug, Clone)]
pub struct JobLog {
    pub job: Job,
    pub pipeline_id: PipelineId,
    pub git_ref: String,
    pub source: PipelineSource,
    /// `None` for trigger jobs and jobs that never bound, or when the runner
    /// has since been removed.
    pub executor: Option<ExecutorProfile>,
    pub variables: VariableSet,
    pub now: DateTime<Utc>,
}

impl JobLog {
    pub fn lines(&self) -> JobLogLines<'_> {
        JobLogLines {
            log: self,
            phase: Phase::Header,
            script_idx: 0,
        }
    }
}

impl<'a> IntoIterator for &'a JobLog {
    type Item = String;
    type IntoIter = JobLogLines<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Waiting,
    Runner,
    Executor,
    Image,
    Prepare,
    Checkout,
    CacheRestore,
    CacheResult,
    ScriptBanner,
    Script,
    Progress,
    CacheSave,
    Artifacts,
    Cleanup,
    Footer,
    Done,
}

/// Iterator over the lines of a [`JobLog`].
#[derive(Debug, Clone)]
pub struct JobLogLines<'a> {
    log: &'a JobLog,
    phase: Phase,
    script_idx: usize,
}

impl JobLogLines<'_> {
    /// Produce the line for the current phase, if it applies, and move on.
    fn emit(&mut self) -> Option<String> {
        let log = self.log;
        let job = &log.job;
        let started = job.started_at.is_some();

        match self.phase {
            Phase::Header => {
                self.phase = Phase::Waiting;
                Some(format!(
                    "Running job {} ({}) for pipeline #{} on {} [{}], attempt {}",
                    job.name, job.id, log.pipeline_id, log.git_ref, log.source, job.attempt
                ))
            }
            Phase::Waiting => {
                self.phase = Phase::Runner;
                match job.status {
                    JobStatus::Created => {
                        self.phase = Phase::Done;
                        Some("Job is created; its stage has not started yet".to_string())
                    }
                    JobStatus::Manual => {
                        self.phase = Phase::Done;
                        Some("Job is manual; waiting to be played".to_string())
                    }
                    JobStatus::Pending => {
                        self.phase = Phase::Done;
                        let tags = if job.tags.is_empty() {
                            "any runner".to_string()
                        } else {
                            format!("a runner with tags [{}]", job.tags.join(", "))
                        };
                        Some(format!("Job is pending; waiting for {tags}"))
                    }
                    JobStatus::Skipped => {
                        self.phase = Phase::Done;
                        Some("Job skipped: its when condition can no longer hold".to_string())
                    }
                    JobStatus::Canceled if !started => {
                        self.phase = Phase::Done;
                        Some("Job canceled before it started".to_string())
                    }
                    _ => None,
                }
            }
            Phase::Runner => {
                self.phase = Phase::Executor;
                if let Some(child) = job.child_pipeline_id {
                    self.phase = Phase::Footer;
                    return Some(format!("Triggered downstream pipeline #{child}"));
                }
                job.runner_id
                    .as_ref()
                    .map(|r| format!("  on {r}"))
            }
            Phase::Executor => {
                self.phase = Phase::Image;
                log.executor
                    .as_ref()
                    .map(|p| match &p.label {
                        Some(label) => format!("Preparing the \"{}\" executor ({label})", p.kind),
                        None => format!("Preparing the \"{}\" executor", p.kind),
                    })
            }
            Phase::Image => {
                self.phase = Phase::Prepare;
                let profile = log.executor.as_ref()?;
                match (&profile.image, &profile.namespace) {
                    (Some(image), Some(ns)) => {
                        Some(format!("Using image {image} in namespace {ns}"))
                    }
                    (Some(image), None) => Some(format!("Using docker image {image}")),
                    _ => None,
                }
            }
            Phase::Prepare => {
                self.phase = Phase::Checkout;
                Some("Preparing environment".to_string())
            }
            Phase::Checkout => {
                self.phase = Phase::CacheRestore;
                Some(format!("Checking out {}", log.git_ref))
            }
            Phase::CacheRestore => {
                self.phase = Phase::CacheResult;
                job.spec.cache.as_ref().map(|c| {
                    format!("Restoring cache for key {}", log.variables.expand_masked(&c.key))
                })
            }
            Phase::CacheResult => {
                self.phase = Phase::ScriptBanner;
                match job.cache? {
                    CacheOutcome::Hit => Some("Successfully extracted cache".to_string()),
                    CacheOutcome::Miss => Some("No cache found; continuing".to_string()),
                }
            }
            Phase::ScriptBanner => {
                self.phase = Phase::Script;
                Some("Executing \"step_script\" stage of the job script".to_string())
            }
            Phase::Script => match job.spec.script.get(self.script_idx) {
                Some(line) => {
                    self.script_idx += 1;
                    Some(format!("$ {}", log.variables.expand_masked(line)))
                }
                None => {
                    self.phase = Phase::Progress;
                    None
                }
            },
            Phase::Progress => {
                self.phase = Phase::CacheSave;
                if job.status != JobStatus::Running {
                    return None;
                }
                let elapsed = job.elapsed(log.now).unwrap_or_default();
                let total = job.duration.unwrap_or_default();
                self.phase = Phase::Done;
                Some(format!(
                    "Job is running: {:.0}% ({}s of {}s)",
                    job.progress(log.now) * 100.0,
                    elapsed.num_seconds(),
                    total.num_seconds()
                ))
            }
            Phase::CacheSave => {
                self.phase = Phase::Artifacts;
                if job.status != JobStatus::Success {
                    return None;
                }
                job.spec
                    .cache
                    .as_ref()
                    .map(|_| "Saving cache for successful job".to_string())
            }
            Phase::Artifacts => {
                self.phase = Phase::Cleanup;
                if job.artifact_ids.is_empty() {
                    return None;
                }
                let paths = job
                    .spec
                    .artifacts
                    .as_ref()
                    .map(|a| a.paths.join(", "))
                    .unwrap_or_default();
                Some(format!("Uploading artifacts: {paths}"))
            }
            Phase::Cleanup => {
                self.phase = Phase::Footer;
                Some("Cleaning up project directory and file based variables".to_string())
            }
            Phase::Footer => {
                self.phase = Phase::Done;
                match job.status {
                    JobStatus::Success => Some("Job succeeded".to_string()),
                    JobStatus::Failed => Some(format!(
                        "ERROR: Job failed: {}",
                        job.failure_reason
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    )),
                    JobStatus::Canceled => Some("Job canceled".to_string()),
                    _ => None,
                }
            }
            Phase::Done => None,
        }
    }
}

impl Iterator for JobLogLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.phase != Phase::Done {
            if let Some(line) = self.emit() {
                return Some(line);
            }
        }
        None
    }
}
