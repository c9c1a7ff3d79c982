// src/config/validate.rs

//! Semantic validation of a raw config, producing the typed [`ConfigFile`].
//!
//! Validation never stops at the first problem: every issue is collected
//! with the path of the offending field, and the document is rejected as a
//! whole if any were found.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, JobConfig, PipelineConfig, RawConfigFile, RunnerConfig, ScheduleConfig, Settings,
    VariableConfig,
};
use crate::config::resolve::{ExecutorSettings, RunnerOverrides, resolve_profile};
use crate::errors::{EngineError, ValidationErrors, ValidationIssue};
use crate::pipeline::template::{
    ArtifactSpec, CacheSpec, JobTemplate, PipelineTemplate, RefFilter, StageTemplate,
};
use crate::resources::{EnvironmentSpec, Variable};
use crate::runner::RunnerSpec;
use crate::schedule::{CronExpr, ScheduleSpec};
use crate::types::{PipelineSource, WhenPolicy};

static VARIABLE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable key pattern is valid")
});

const ENVIRONMENT_TIERS: [&str; 5] = ["production", "staging", "testing", "development", "other"];

/// Upper bound on automatic job retries.
pub const MAX_JOB_RETRY: u32 = 2;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let mut v = Validator::default();

        let settings = v.settings(&raw);
        let variables = v.variables(&raw);
        let environments = v.environments(&raw);
        let runners = v.runners(&raw, &settings);
        let pipelines = v.pipelines(&raw);
        v.trigger_graph(&raw);
        let schedules = v.schedules(&raw);

        v.finish()?;
        Ok(ConfigFile::new_unchecked(
            settings,
            variables,
            environments,
            runners,
            pipelines,
            schedules,
        ))
    }
}

#[derive(Debug, Default)]
struct Validator {
    issues: Vec<ValidationIssue>,
}

impl Validator {
    fn issue(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(path, message));
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.issues))
        }
    }

    fn duration(&mut self, path: &str, value: &str) -> Option<TimeDelta> {
        match parse_duration(value) {
            Ok(d) => Some(d),
            Err(e) => {
                self.issue(path, e);
                None
            }
        }
    }

    fn optional_duration(&mut self, path: &str, value: Option<&str>) -> Option<TimeDelta> {
        value.and_then(|s| self.duration(path, s))
    }

    fn fail_rate(&mut self, path: &str, rate: Option<f64>) -> Option<f64> {
        let rate = rate?;
        if !(0.0..=1.0).contains(&rate) {
            self.issue(path, format!("must be between 0.0 and 1.0 (got {rate})"));
            return None;
        }
        Some(rate)
    }

    fn tags(&mut self, path: &str, tags: &[String]) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (i, tag) in tags.iter().enumerate() {
            let tag = tag.trim();
            if tag.is_empty() {
                self.issue(format!("{path}[{i}]"), "tag must not be empty");
            } else if !out.insert(tag.to_string()) {
                self.issue(format!("{path}[{i}]"), format!("duplicate tag '{tag}'"));
            }
        }
        out
    }

    fn ref_filter(&mut self, path: &str, patterns: &[String]) -> Option<RefFilter> {
        if patterns.is_empty() {
            return None;
        }
        match RefFilter::new(patterns) {
            Ok(filter) => Some(filter),
            Err(e) => {
                self.issue(path, format!("invalid ref glob: {e}"));
                None
            }
        }
    }

    fn settings(&mut self, raw: &RawConfigFile) -> Settings {
        let s = &raw.settings;
        if s.concurrent_jobs == 0 {
            self.issue("settings.concurrent_jobs", "must be >= 1 (got 0)");
        }
        if s.history_limit == Some(0) {
            self.issue("settings.history_limit", "must be >= 1 when set (got 0)");
        }
        let default_job_duration = self
            .duration("settings.default_job_duration", &s.default_job_duration)
            .unwrap_or(TimeDelta::seconds(30));

        Settings {
            enable_runners: s.enable_runners,
            enable_cache: s.enable_cache,
            enable_artifacts: s.enable_artifacts,
            concurrent_jobs: s.concurrent_jobs.max(1),
            default_job_duration,
            history_limit: s.history_limit,
        }
    }

    fn variables(&mut self, raw: &RawConfigFile) -> Vec<Variable> {
        let mut out = Vec::with_capacity(raw.variables.len());
        for (key, cfg) in &raw.variables {
            if !VARIABLE_KEY.is_match(key) {
                self.issue(
                    format!("variables.{key}"),
                    "key must start with a letter or '_' and contain only letters, digits and '_'",
                );
                continue;
            }
            let var = match cfg {
                VariableConfig::Plain(value) => Variable {
                    key: key.clone(),
                    value: value.clone(),
                    masked: false,
                    description: None,
                },
                VariableConfig::Detailed {
                    value,
                    masked,
                    description,
                } => {
                    if *masked && value.len() < 8 {
                        self.issue(
                            format!("variables.{key}.value"),
                            "masked values must be at least 8 characters",
                        );
                    }
                    Variable {
                        key: key.clone(),
                        value: value.clone(),
                        masked: *masked,
                        description: description.clone(),
                    }
                }
            };
            out.push(var);
        }
        out
    }

    fn environments(&mut self, raw: &RawConfigFile) -> Vec<EnvironmentSpec> {
        let mut out = Vec::with_capacity(raw.environments.len());
        for (name, cfg) in &raw.environments {
            if let Some(tier) = &cfg.tier {
                if !ENVIRONMENT_TIERS.contains(&tier.as_str()) {
                    self.issue(
                        format!("environments.{name}.tier"),
                        format!(
                            "unknown tier '{tier}' (expected one of {})",
                            ENVIRONMENT_TIERS.join(", ")
                        ),
                    );
                }
            }
            out.push(EnvironmentSpec {
                name: name.clone(),
                url: cfg.url.clone(),
                tier: cfg.tier.clone(),
            });
        }
        out
    }

    fn runners(&mut self, raw: &RawConfigFile, settings: &Settings) -> Vec<RunnerSpec> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(raw.runners.len());
        for (i, r) in raw.runners.iter().enumerate() {
            let path = format!("runner[{i}]");
            if let Some(spec) = self.runner(&path, r, settings, &mut seen) {
                out.push(spec);
            }
        }
        out
    }

    fn runner(
        &mut self,
        path: &str,
        r: &RunnerConfig,
        settings: &Settings,
        seen: &mut HashSet<String>,
    ) -> Option<RunnerSpec> {
        let before = self.issues.len();

        if r.id.trim().is_empty() {
            self.issue(format!("{path}.id"), "runner id must not be empty");
        } else if !seen.insert(r.id.clone()) {
            self.issue(format!("{path}.id"), format!("duplicate runner id '{}'", r.id));
        }
        if r.max_jobs == Some(0) {
            self.issue(format!("{path}.max_jobs"), "must be >= 1 (got 0)");
        }
        let tags = self.tags(&format!("{path}.tags"), &r.tags);
        let overrides = RunnerOverrides {
            startup: self.optional_duration(&format!("{path}.startup"), r.startup.as_deref()),
            fail_rate: self.fail_rate(&format!("{path}.fail_rate"), r.fail_rate),
        };

        let executor = match ExecutorSettings::from_config(&r.executor, parse_duration) {
            Ok(e) => Some(e),
            Err(e) => {
                self.issue(format!("{path}.executor.startup"), e);
                None
            }
        };
        if let Some(ExecutorSettings::Custom {
            driver, fail_rate, ..
        }) = &executor
        {
            if driver.trim().is_empty() {
                self.issue(format!("{path}.executor.driver"), "custom executor needs a driver");
            }
            self.fail_rate(&format!("{path}.executor.fail_rate"), *fail_rate);
        }

        if self.issues.len() > before {
            return None;
        }
        let executor = executor?;
        Some(RunnerSpec {
            id: r.id.clone(),
            description: r.description.clone(),
            tags,
            max_jobs: r.max_jobs.unwrap_or(settings.concurrent_jobs),
            active: r.active,
            profile: resolve_profile(&executor, overrides),
        })
    }

    fn pipelines(&mut self, raw: &RawConfigFile) -> Vec<PipelineTemplate> {
        let known: HashSet<&str> = raw.pipelines.iter().map(|p| p.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(raw.pipelines.len());
        for (i, p) in raw.pipelines.iter().enumerate() {
            let path = format!("pipeline[{i}]");
            if p.id.trim().is_empty() {
                self.issue(format!("{path}.id"), "pipeline id must not be empty");
            } else if !seen.insert(p.id.as_str()) {
                self.issue(format!("{path}.id"), format!("duplicate pipeline id '{}'", p.id));
            }
            if let Some(t) = self.pipeline(&path, p, &known) {
                out.push(t);
            }
        }
        out
    }

    fn pipeline(
        &mut self,
        path: &str,
        p: &PipelineConfig,
        known: &HashSet<&str>,
    ) -> Option<PipelineTemplate> {
        let before = self.issues.len();

        if p.git_ref.trim().is_empty() {
            self.issue(format!("{path}.ref"), "ref must not be empty");
        }
        let source = match p.source.as_deref().map(str::parse::<PipelineSource>) {
            None => PipelineSource::Push,
            Some(Ok(s)) => s,
            Some(Err(e)) => {
                self.issue(format!("{path}.source"), e);
                PipelineSource::Push
            }
        };
        if p.stages.is_empty() {
            self.issue(format!("{path}.stage"), "pipeline must have at least one stage");
        }

        let mut stage_names = HashSet::new();
        let mut job_names = HashSet::new();
        let mut stages = Vec::with_capacity(p.stages.len());
        for (si, stage) in p.stages.iter().enumerate() {
            let spath = format!("{path}.stage[{si}]");
            if stage.name.trim().is_empty() {
                self.issue(format!("{spath}.name"), "stage name must not be empty");
            } else if !stage_names.insert(stage.name.as_str()) {
                self.issue(
                    format!("{spath}.name"),
                    format!("duplicate stage '{}' in pipeline '{}'", stage.name, p.id),
                );
            }
            if stage.jobs.is_empty() {
                self.issue(format!("{spath}.job"), "stage must have at least one job");
            }

            let mut jobs = Vec::with_capacity(stage.jobs.len());
            for (ji, job) in stage.jobs.iter().enumerate() {
                let jpath = format!("{spath}.job[{ji}]");
                if job.name.trim().is_empty() {
                    self.issue(format!("{jpath}.name"), "job name must not be empty");
                } else if !job_names.insert(job.name.as_str()) {
                    self.issue(
                        format!("{jpath}.name"),
                        format!("duplicate job '{}' in pipeline '{}'", job.name, p.id),
                    );
                }
                if let Some(t) = self.job(&jpath, &stage.name, job, known) {
                    jobs.push(Arc::new(t));
                }
            }
            stages.push(StageTemplate {
                name: stage.name.clone(),
                jobs,
            });
        }

        if self.issues.len() > before {
            return None;
        }
        Some(PipelineTemplate {
            id: p.id.clone(),
            description: p.description.clone(),
            git_ref: p.git_ref.clone(),
            source,
            stages,
            variables: p.variables.clone(),
        })
    }

    fn job(
        &mut self,
        path: &str,
        stage: &str,
        j: &JobConfig,
        known: &HashSet<&str>,
    ) -> Option<JobTemplate> {
        let before = self.issues.len();

        let when = match j.when.as_deref().map(str::parse::<WhenPolicy>) {
            None => WhenPolicy::OnSuccess,
            Some(Ok(w)) => w,
            Some(Err(e)) => {
                self.issue(format!("{path}.when"), e);
                WhenPolicy::OnSuccess
            }
        };
        let tags = self.tags(&format!("{path}.tags"), &j.tags);
        let duration = self.optional_duration(&format!("{path}.duration"), j.duration.as_deref());
        let timeout = self.optional_duration(&format!("{path}.timeout"), j.timeout.as_deref());
        if timeout.is_some_and(|t| t <= TimeDelta::zero()) {
            self.issue(format!("{path}.timeout"), "timeout must be positive");
        }
        let fail_rate = self.fail_rate(&format!("{path}.fail_rate"), j.fail_rate);
        if j.retry > MAX_JOB_RETRY {
            self.issue(
                format!("{path}.retry"),
                format!("must be between 0 and {MAX_JOB_RETRY} (got {})", j.retry),
            );
        }
        let only = self.ref_filter(&format!("{path}.only"), &j.only);
        let except = self.ref_filter(&format!("{path}.except"), &j.except);

        if let Some(target) = &j.trigger {
            if !known.contains(target.as_str()) {
                self.issue(
                    format!("{path}.trigger"),
                    format!("unknown pipeline '{target}'"),
                );
            }
            if !j.script.is_empty() {
                self.issue(format!("{path}.script"), "trigger jobs cannot have a script");
            }
            if when == WhenPolicy::Manual {
                self.issue(format!("{path}.when"), "trigger jobs cannot be manual");
            }
        }

        if let Some(env) = &j.environment {
            if env.trim().is_empty() {
                self.issue(format!("{path}.environment"), "environment must not be empty");
            }
        }

        let cache = match &j.cache {
            Some(c) if c.key.trim().is_empty() => {
                self.issue(format!("{path}.cache.key"), "cache key must not be empty");
                None
            }
            Some(c) => Some(CacheSpec {
                key: c.key.clone(),
                paths: c.paths.clone(),
            }),
            None => None,
        };
        let artifacts = match &j.artifacts {
            Some(a) => {
                if a.paths.is_empty() {
                    self.issue(format!("{path}.artifacts.paths"), "artifacts need at least one path");
                }
                let expire_in = self.optional_duration(
                    &format!("{path}.artifacts.expire_in"),
                    a.expire_in.as_deref(),
                );
                Some(ArtifactSpec {
                    paths: a.paths.clone(),
                    expire_in,
                })
            }
            None => None,
        };

        if self.issues.len() > before {
            return None;
        }
        Some(JobTemplate {
            name: j.name.clone(),
            stage: stage.to_string(),
            when,
            allow_failure: j.allow_failure,
            tags,
            script: j.script.clone(),
            duration,
            timeout,
            fail_rate,
            retry: j.retry,
            only,
            except,
            environment: j.environment.clone(),
            trigger: j.trigger.clone(),
            cache,
            artifacts,
            variables: j.variables.clone(),
        })
    }

    /// Reject trigger chains that loop back to a pipeline already in the
    /// chain.
    fn trigger_graph(&mut self, raw: &RawConfigFile) {
        // Edge direction: parent -> child.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for p in &raw.pipelines {
            graph.add_node(p.id.as_str());
        }
        for p in &raw.pipelines {
            for job in p.stages.iter().flat_map(|s| s.jobs.iter()) {
                if let Some(target) = &job.trigger {
                    graph.add_edge(p.id.as_str(), target.as_str(), ());
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let node = cycle.node_id();
            let index = raw
                .pipelines
                .iter()
                .position(|p| p.id == node)
                .unwrap_or_default();
            self.issue(
                format!("pipeline[{index}]"),
                format!("trigger cycle detected involving pipeline '{node}'"),
            );
        }
    }

    fn schedules(&mut self, raw: &RawConfigFile) -> Vec<ScheduleSpec> {
        let templates: BTreeMap<&str, &PipelineConfig> =
            raw.pipelines.iter().map(|p| (p.id.as_str(), p)).collect();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(raw.schedules.len());
        for (i, s) in raw.schedules.iter().enumerate() {
            let path = format!("schedule[{i}]");
            if let Some(spec) = self.schedule(&path, s, &templates, &mut seen) {
                out.push(spec);
            }
        }
        out
    }

    fn schedule(
        &mut self,
        path: &str,
        s: &ScheduleConfig,
        templates: &BTreeMap<&str, &PipelineConfig>,
        seen: &mut HashSet<String>,
    ) -> Option<ScheduleSpec> {
        let before = self.issues.len();

        if s.id.trim().is_empty() {
            self.issue(format!("{path}.id"), "schedule id must not be empty");
        } else if !seen.insert(s.id.clone()) {
            self.issue(format!("{path}.id"), format!("duplicate schedule id '{}'", s.id));
        }
        if !templates.contains_key(s.pipeline.as_str()) {
            self.issue(
                format!("{path}.pipeline"),
                format!("unknown pipeline '{}'", s.pipeline),
            );
        }
        let cron = match CronExpr::parse(&s.cron) {
            Ok(c) => Some(c),
            Err(e) => {
                self.issue(format!("{path}.cron"), e.to_string());
                None
            }
        };
        let last_fired_at = match s.last_fired_at.as_deref().map(DateTime::<FixedOffset>::parse_from_rfc3339) {
            None => None,
            Some(Ok(t)) => Some(t.with_timezone(&Utc)),
            Some(Err(e)) => {
                self.issue(
                    format!("{path}.last_fired_at"),
                    format!("expected an RFC 3339 timestamp: {e}"),
                );
                None
            }
        };

        if self.issues.len() > before {
            return None;
        }
        Some(ScheduleSpec {
            id: s.id.clone(),
            description: s.description.clone(),
            template_id: s.pipeline.clone(),
            git_ref: s.git_ref.clone(),
            cron: cron?,
            active: s.active,
            last_fired_at,
        })
    }
}
