// src/runner/pool.rs

//! Capacity-limited runner pool and job admission.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::runner::profile::ExecutorProfile;
use crate::types::RunnerId;

/// Validated runner definition from config.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSpec {
    pub id: RunnerId,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub max_jobs: usize,
    pub active: bool,
    pub profile: ExecutorProfile,
}

/// A runner and its live load.
///
/// Invariant: `current_jobs <= max_jobs`. Only the pool mutates
/// `current_jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct Runner {
    pub id: RunnerId,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub max_jobs: usize,
    pub current_jobs: usize,
    pub active: bool,
    /// Removed from config while busy; takes no new jobs and is dropped
    /// once drained.
    pub retiring: bool,
    pub profile: ExecutorProfile,
    /// Total jobs ever bound to this runner.
    pub jobs_started: u64,
    /// Lowered capacity waiting for running jobs to drain.
    #[serde(skip)]
    deferred_max: Option<usize>,
}

impl Runner {
    fn from_spec(spec: &RunnerSpec) -> Self {
        Self {
            id: spec.id.clone(),
            description: spec.description.clone(),
            tags: spec.tags.clone(),
            max_jobs: spec.max_jobs,
            current_jobs: 0,
            active: spec.active,
            retiring: false,
            profile: spec.profile.clone(),
            jobs_started: 0,
            deferred_max: None,
        }
    }

    /// Tags are a superset of `required`, the runner is accepting work and
    /// has a free slot.
    pub fn can_take(&self, required: &BTreeSet<String>) -> bool {
        self.active
            && !self.retiring
            && self.current_jobs < self.max_jobs
            && self.tags.is_superset(required)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_jobs == 0 {
            0.0
        } else {
            self.current_jobs as f64 / self.max_jobs as f64
        }
    }

    fn apply_spec(&mut self, spec: &RunnerSpec) {
        self.description = spec.description.clone();
        self.tags = spec.tags.clone();
        self.active = spec.active;
        self.profile = spec.profile.clone();
        self.retiring = false;
        if spec.max_jobs >= self.current_jobs {
            self.max_jobs = spec.max_jobs;
            self.deferred_max = None;
        } else {
            // Keep the invariant: shrink as jobs finish.
            self.max_jobs = self.current_jobs;
            self.deferred_max = Some(spec.max_jobs);
        }
    }

    fn settle_deferred_max(&mut self) {
        if let Some(target) = self.deferred_max {
            self.max_jobs = self.current_jobs.max(target);
            if self.max_jobs == target {
                self.deferred_max = None;
            }
        }
    }
}

/// What a reconfiguration changed in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerDelta {
    pub added: Vec<RunnerId>,
    pub removed: Vec<RunnerId>,
    pub retiring: Vec<RunnerId>,
    pub updated: Vec<RunnerId>,
}

/// Ordered set of runners. Insertion order breaks admission ties.
#[derive(Debug, Clone, Default)]
pub struct RunnerPool {
    runners: Vec<Runner>,
}

impl RunnerPool {
    pub fn from_specs(specs: &[RunnerSpec]) -> Self {
        Self {
            runners: specs.iter().map(Runner::from_spec).collect(),
        }
    }

    pub fn runners(&self) -> &[Runner] {
        &self.runners
    }

    pub fn get(&self, id: &str) -> Option<&Runner> {
        self.runners.iter().find(|r| r.id == id)
    }

    /// Least-loaded runner that can take a job with `required` tags.
    /// Ties go to the earliest inserted runner.
    pub fn select(&self, required: &BTreeSet<String>) -> Option<&Runner> {
        self.runners
            .iter()
            .filter(|r| r.can_take(required))
            .min_by_key(|r| r.current_jobs)
    }

    /// Bind one job slot on the best runner for `required`.
    ///
    /// Returns the chosen runner, or `None` when no runner is eligible
    /// (backpressure, not an error).
    pub fn acquire(&mut self, required: &BTreeSet<String>) -> Option<&Runner> {
        let idx = self
            .runners
            .iter()
            .enumerate()
            .filter(|(_, r)| r.can_take(required))
            .min_by_key(|(i, r)| (r.current_jobs, *i))
            .map(|(i, _)| i)?;

        let runner = &mut self.runners[idx];
        runner.current_jobs += 1;
        runner.jobs_started += 1;
        assert!(
            runner.current_jobs <= runner.max_jobs,
            "runner {} over capacity: {}/{}",
            runner.id,
            runner.current_jobs,
            runner.max_jobs
        );
        debug!(
            runner = %runner.id,
            current_jobs = runner.current_jobs,
            max_jobs = runner.max_jobs,
            "runner slot acquired"
        );
        Some(&self.runners[idx])
    }

    /// Return one job slot to `id`.
    ///
    /// Panics if the runner holds no slot: that is a bookkeeping bug, not a
    /// recoverable condition.
    pub fn release(&mut self, id: &str) {
        let Some(idx) = self.runners.iter().position(|r| r.id == id) else {
            panic!("release on unknown runner {id}");
        };

        let runner = &mut self.runners[idx];
        assert!(
            runner.current_jobs > 0,
            "runner {} released with no jobs running",
            runner.id
        );
        runner.current_jobs -= 1;
        runner.settle_deferred_max();
        debug!(
            runner = %runner.id,
            current_jobs = runner.current_jobs,
            "runner slot released"
        );

        if runner.retiring && runner.current_jobs == 0 {
            info!(runner = %runner.id, "retired runner drained; removing");
            self.runners.remove(idx);
        }
    }

    pub fn total_capacity(&self) -> usize {
        self.runners.iter().map(|r| r.max_jobs).sum()
    }

    pub fn total_load(&self) -> usize {
        self.runners.iter().map(|r| r.current_jobs).sum()
    }

    /// Reconcile against a new runner set, preserving live load.
    ///
    /// Busy runners that disappeared from config retire instead of vanishing,
    /// so their running jobs can still release their slots.
    pub fn reconcile(&mut self, specs: &[RunnerSpec]) -> RunnerDelta {
        let mut delta = RunnerDelta::default();

        let mut kept: Vec<Runner> = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.runners.iter().position(|r| r.id == spec.id) {
                Some(idx) => {
                    let mut runner = self.runners.remove(idx);
                    let before = (
                        runner.tags.clone(),
                        runner.max_jobs,
                        runner.active,
                        runner.profile.clone(),
                        runner.retiring,
                    );
                    runner.apply_spec(spec);
                    let after = (
                        runner.tags.clone(),
                        runner.max_jobs,
                        runner.active,
                        runner.profile.clone(),
                        runner.retiring,
                    );
                    if before != after || runner.deferred_max.is_some() {
                        delta.updated.push(spec.id.clone());
                    }
                    kept.push(runner);
                }
                None => {
                    delta.added.push(spec.id.clone());
                    kept.push(Runner::from_spec(spec));
                }
            }
        }

        for mut leftover in self.runners.drain(..) {
            if leftover.current_jobs > 0 {
                leftover.retiring = true;
                delta.retiring.push(leftover.id.clone());
                kept.push(leftover);
            } else {
                delta.removed.push(leftover.id.clone());
            }
        }

        self.runners = kept;
        delta
    }
}
