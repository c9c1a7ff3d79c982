// src/schedule/mod.rs

//! Cron-driven pipeline triggers.
//!
//! - [`cron`] parses expressions and computes fire times.
//! - [`Schedule`] holds the per-schedule timing state the engine consults in
//!   `evaluate_schedules`.

pub mod cron;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::types::{PipelineId, ScheduleId, TemplateId};

pub use cron::{CronError, CronExpr};

/// Validated schedule definition from config.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSpec {
    pub id: ScheduleId,
    pub description: String,
    pub template_id: TemplateId,
    /// Overrides the template's ref for executions this schedule starts.
    pub git_ref: Option<String>,
    pub cron: CronExpr,
    pub active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// Runtime schedule state.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub description: String,
    pub template_id: TemplateId,
    pub git_ref: Option<String>,
    pub cron: CronExpr,
    pub active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Next fire time; computed on first evaluation if never fired.
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_pipeline_id: Option<PipelineId>,
    pub fired: u64,
    /// Fire times dropped because the previous execution was still running.
    pub skipped: u64,
}

impl Schedule {
    pub fn from_spec(spec: &ScheduleSpec) -> Self {
        Self {
            id: spec.id.clone(),
            description: spec.description.clone(),
            template_id: spec.template_id.clone(),
            git_ref: spec.git_ref.clone(),
            cron: spec.cron.clone(),
            active: spec.active,
            last_fired_at: spec.last_fired_at,
            next_run_at: spec.last_fired_at.and_then(|t| spec.cron.next_after(t)),
            last_pipeline_id: None,
            fired: 0,
            skipped: 0,
        }
    }

    /// Apply an edited definition, keeping timing state unless the cron
    /// expression changed.
    pub fn apply_spec(&mut self, spec: &ScheduleSpec) {
        let cron_changed = self.cron != spec.cron;
        self.description = spec.description.clone();
        self.template_id = spec.template_id.clone();
        self.git_ref = spec.git_ref.clone();
        self.cron = spec.cron.clone();
        self.active = spec.active;
        if cron_changed {
            self.next_run_at = self.last_fired_at.and_then(|t| self.cron.next_after(t));
        }
    }

    /// Whether `now` has crossed the next fire time.
    ///
    /// A schedule that has never fired starts counting from the first time
    /// it is evaluated.
    pub fn is_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.next_run_at.is_none() && self.last_fired_at.is_none() {
            self.next_run_at = self.cron.next_after(now);
            debug!(
                schedule = %self.id,
                next_run_at = ?self.next_run_at,
                "schedule registered"
            );
        }
        matches!(self.next_run_at, Some(next) if now >= next)
    }

    pub fn mark_fired(&mut self, now: DateTime<Utc>, pipeline_id: PipelineId) {
        self.last_fired_at = Some(now);
        self.last_pipeline_id = Some(pipeline_id);
        self.fired += 1;
        self.next_run_at = self.cron.next_after(now);
    }

    /// Drop this fire time without starting anything. No backfill: the next
    /// fire time is the first one strictly after `now`.
    pub fn mark_skipped(&mut self, now: DateTime<Utc>) {
        self.skipped += 1;
        self.next_run_at = self.cron.next_after(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly() -> ScheduleSpec {
        ScheduleSpec {
            id: "hourly".into(),
            description: "every hour".into(),
            template_id: "main".into(),
            git_ref: None,
            cron: CronExpr::parse("0 * * * *").unwrap(),
            active: true,
            last_fired_at: None,
        }
    }

    #[test]
    fn never_fired_schedule_waits_for_next_boundary() {
        let mut s = Schedule::from_spec(&hourly());
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        assert!(!s.is_due(t));
        assert_eq!(
            s.next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap())
        );
        assert!(s.is_due(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()));
    }

    #[test]
    fn skipping_does_not_backfill() {
        let mut s = Schedule::from_spec(&hourly());
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        assert!(!s.is_due(t));
        // Five boundaries pass unobserved; only one fire is due.
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 15, 10, 0).unwrap();
        assert!(s.is_due(late));
        s.mark_skipped(late);
        assert_eq!(s.skipped, 1);
        assert_eq!(
            s.next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap())
        );
        assert!(!s.is_due(late));
    }

    #[test]
    fn cron_edit_recomputes_next_run() {
        let mut s = Schedule::from_spec(&hourly());
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        s.mark_fired(t, 1);

        let mut edited = hourly();
        edited.cron = CronExpr::parse("30 * * * *").unwrap();
        s.apply_spec(&edited);
        assert_eq!(
            s.next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 30, 0).unwrap())
        );
        assert_eq!(s.fired, 1);
    }
}
