// src/runner/policy.rs

//! Deterministic synthetic outcomes for simulated jobs.
//!
//! Nothing here is random: every draw is a blake3 hash of the identity of the
//! attempt, so the same pipeline id, job name and attempt always produce the
//! same outcome. That keeps virtual-time runs reproducible.

use blake3::Hasher;
use chrono::TimeDelta;

use crate::types::PipelineId;

/// How a bound job will end, decided at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPlan {
    /// Time from bind until the job resolves.
    pub run_for: TimeDelta,
    pub outcome: PlannedOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOutcome {
    Success,
    ScriptFailure,
    Timeout,
}

/// Inputs for [`plan_job`], gathered from the job template and the runner's
/// resolved profile.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub pipeline_id: PipelineId,
    pub job_name: &'a str,
    pub attempt: u32,
    pub duration: TimeDelta,
    pub startup: TimeDelta,
    pub timeout: Option<TimeDelta>,
    pub fail_rate: f64,
}

/// Decide duration and outcome for one job attempt.
///
/// The synthetic duration is the job duration plus executor startup. A
/// timeout shorter than that cuts the run short and wins over the failure
/// draw.
pub fn plan_job(input: PlanInput<'_>) -> JobPlan {
    let total = input.duration + input.startup;

    if let Some(timeout) = input.timeout {
        if timeout < total {
            return JobPlan {
                run_for: timeout,
                outcome: PlannedOutcome::Timeout,
            };
        }
    }

    let draw = failure_draw(input.pipeline_id, input.job_name, input.attempt);
    let outcome = if fails(input.fail_rate, draw) {
        PlannedOutcome::ScriptFailure
    } else {
        PlannedOutcome::Success
    };

    JobPlan {
        run_for: total,
        outcome,
    }
}

/// Fraction in `[0, 1)` derived from the attempt identity.
pub fn failure_draw(pipeline_id: PipelineId, job_name: &str, attempt: u32) -> f64 {
    let mut hasher = Hasher::new();
    hasher.update(b"pipesim.failure");
    hasher.update(&pipeline_id.to_le_bytes());
    hasher.update(job_name.as_bytes());
    hasher.update(&attempt.to_le_bytes());
    unit_fraction(&hasher.finalize())
}

/// `draw` is in `[0, 1)`, so a rate of 1.0 always fails and 0.0 never does.
pub fn fails(fail_rate: f64, draw: f64) -> bool {
    draw < fail_rate
}

const MIN_ARTIFACT_BYTES: u64 = 1024;
const MAX_ARTIFACT_BYTES: u64 = 64 * 1024 * 1024;

/// Synthetic artifact archive size in bytes.
pub fn artifact_size(pipeline_id: PipelineId, job_name: &str, paths: &[String]) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(b"pipesim.artifact");
    hasher.update(&pipeline_id.to_le_bytes());
    hasher.update(job_name.as_bytes());
    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
    }
    let span = MAX_ARTIFACT_BYTES - MIN_ARTIFACT_BYTES;
    MIN_ARTIFACT_BYTES + (unit_fraction(&hasher.finalize()) * span as f64) as u64
}

fn unit_fraction(hash: &blake3::Hash) -> f64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    // 53 bits fit an f64 mantissa exactly.
    (u64::from_le_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(fail_rate: f64) -> PlanInput<'static> {
        PlanInput {
            pipeline_id: 1,
            job_name: "build",
            attempt: 1,
            duration: TimeDelta::seconds(30),
            startup: TimeDelta::seconds(5),
            timeout: None,
            fail_rate,
        }
    }

    #[test]
    fn draws_are_deterministic_and_in_range() {
        for attempt in 1..50 {
            let a = failure_draw(3, "test", attempt);
            let b = failure_draw(3, "test", attempt);
            assert_eq!(a, b);
            assert!((0.0..1.0).contains(&a));
        }
        assert_ne!(failure_draw(3, "test", 1), failure_draw(4, "test", 1));
    }

    #[test]
    fn fail_rate_extremes() {
        assert_eq!(plan_job(input(1.0)).outcome, PlannedOutcome::ScriptFailure);
        assert_eq!(plan_job(input(0.0)).outcome, PlannedOutcome::Success);
    }

    #[test]
    fn startup_is_added_to_duration() {
        assert_eq!(plan_job(input(0.0)).run_for, TimeDelta::seconds(35));
    }

    #[test]
    fn short_timeout_cuts_the_run() {
        let mut i = input(0.0);
        i.timeout = Some(TimeDelta::seconds(10));
        let plan = plan_job(i);
        assert_eq!(plan.outcome, PlannedOutcome::Timeout);
        assert_eq!(plan.run_for, TimeDelta::seconds(10));

        i.timeout = Some(TimeDelta::seconds(35));
        assert_eq!(plan_job(i).outcome, PlannedOutcome::Success);
    }

    #[test]
    fn artifact_sizes_stay_in_bounds() {
        let paths = vec!["target/release/app".to_string()];
        let size = artifact_size(9, "package", &paths);
        assert!((MIN_ARTIFACT_BYTES..=MAX_ARTIFACT_BYTES).contains(&size));
        assert_eq!(size, artifact_size(9, "package", &paths));
    }
}
