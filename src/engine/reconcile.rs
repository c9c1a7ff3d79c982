// src/engine/reconcile.rs

//! Applying a new configuration to a running engine.
//!
//! Each resource kind is reconciled as a delta against live state:
//! - templates: in-flight executions keep their snapshot; executions of a
//!   removed template are canceled
//! - runners: busy runners retire instead of vanishing (see
//!   [`RunnerPool::reconcile`](crate::runner::RunnerPool::reconcile))
//! - schedules keep their timing state unless the cron expression changed
//! - environments keep their deployment history

use serde::Serialize;
use tracing::info;

use crate::config::model::ConfigFile;
use crate::engine::core::PipelineEngine;
use crate::pipeline::template::TemplateDelta;
use crate::resources::Environment;
use crate::runner::RunnerDelta;
use crate::schedule::Schedule;
use crate::types::{PipelineId, ScheduleId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleDelta {
    pub added: Vec<ScheduleId>,
    pub removed: Vec<ScheduleId>,
    pub updated: Vec<ScheduleId>,
}

/// What `update_config` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub templates: TemplateDelta,
    pub runners: RunnerDelta,
    pub schedules: ScheduleDelta,
    pub variables: usize,
    pub environments: usize,
    /// Executions canceled because their template was removed.
    pub canceled: Vec<PipelineId>,
}

impl PipelineEngine {
    /// Replace the configuration, reconciling live state.
    ///
    /// The config is already validated; nothing here can fail.
    pub fn update_config(&mut self, config: ConfigFile) -> ReconcileReport {
        let ConfigFile {
            settings,
            variables,
            environments,
            runners,
            pipelines,
            schedules,
        } = config;

        let mut report = ReconcileReport {
            templates: self.templates.reconcile(pipelines),
            runners: self.pool.reconcile(&runners),
            ..ReconcileReport::default()
        };

        let mut next_schedules = Vec::with_capacity(schedules.len());
        for spec in &schedules {
            match self.schedules.iter().position(|s| s.id == spec.id) {
                Some(idx) => {
                    let mut schedule = self.schedules.swap_remove(idx);
                    let changed = schedule.cron != spec.cron
                        || schedule.active != spec.active
                        || schedule.template_id != spec.template_id
                        || schedule.git_ref != spec.git_ref
                        || schedule.description != spec.description;
                    schedule.apply_spec(spec);
                    if changed {
                        report.schedules.updated.push(spec.id.clone());
                    }
                    next_schedules.push(schedule);
                }
                None => {
                    report.schedules.added.push(spec.id.clone());
                    next_schedules.push(Schedule::from_spec(spec));
                }
            }
        }
        report
            .schedules
            .removed
            .extend(self.schedules.drain(..).map(|s| s.id));
        self.schedules = next_schedules;

        // Undeclared environments that saw deployments stay as history.
        let mut next_envs: Vec<Environment> = Vec::with_capacity(environments.len());
        for spec in &environments {
            let env = match self.environments.iter().position(|e| e.name == spec.name) {
                Some(idx) => {
                    let mut env = self.environments.swap_remove(idx);
                    env.url = spec.url.clone();
                    env.tier = spec.tier.clone();
                    env
                }
                None => Environment::from_spec(spec),
            };
            next_envs.push(env);
        }
        next_envs.extend(self.environments.drain(..).filter(|e| e.deployments > 0));
        self.environments = next_envs;
        report.environments = self.environments.len();

        report.variables = variables.len();
        self.variables = variables;
        self.settings = settings;

        let orphaned: Vec<PipelineId> = self
            .executions
            .values()
            .filter(|e| !e.is_terminal() && report.templates.removed.contains(&e.template_id))
            .map(|e| e.id)
            .collect();
        for id in orphaned {
            report.canceled.extend(self.cancel_tree(id));
        }

        info!(
            templates_added = report.templates.added.len(),
            templates_removed = report.templates.removed.len(),
            templates_updated = report.templates.updated.len(),
            runners_added = report.runners.added.len(),
            runners_removed = report.runners.removed.len(),
            runners_retiring = report.runners.retiring.len(),
            schedules_added = report.schedules.added.len(),
            schedules_removed = report.schedules.removed.len(),
            canceled = report.canceled.len(),
            "configuration reconciled"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{ConfigFormat, validate_str};

    fn config(src: &str) -> ConfigFile {
        validate_str(src, ConfigFormat::Toml).unwrap()
    }

    const BASE: &str = r#"
        [[pipeline]]
        id = "main"
        [[pipeline.stage]]
        name = "build"
        [[pipeline.stage.job]]
        name = "compile"

        [[schedule]]
        id = "hourly"
        pipeline = "main"
        cron = "0 * * * *"
        last_fired_at = "2024-01-01T00:00:00Z"
    "#;

    #[test]
    fn unchanged_schedule_keeps_its_timing() {
        let mut engine = PipelineEngine::new(config(BASE));
        engine.schedules[0].fired = 4;
        let next = engine.schedules[0].next_run_at;

        let report = engine.update_config(config(BASE));
        assert_eq!(report.schedules, ScheduleDelta::default());
        assert!(report.templates.is_empty());
        assert_eq!(engine.schedules[0].fired, 4);
        assert_eq!(engine.schedules[0].next_run_at, next);
    }

    #[test]
    fn undeclared_environment_without_deployments_is_dropped() {
        let mut engine = PipelineEngine::new(config(&format!(
            "{BASE}\n[environments.review]\nurl = \"https://review.local\"\n"
        )));
        assert_eq!(engine.environments.len(), 1);

        let report = engine.update_config(config(BASE));
        assert_eq!(report.environments, 0);
        assert!(engine.environments.is_empty());
    }
}
