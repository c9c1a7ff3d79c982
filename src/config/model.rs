// src/config/model.rs

use std::collections::BTreeMap;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::pipeline::template::PipelineTemplate;
use crate::resources::{EnvironmentSpec, Variable};
use crate::runner::RunnerSpec;
use crate::schedule::ScheduleSpec;

/// Top-level configuration as read from TOML (or imported from YAML).
///
/// ```toml
/// [settings]
/// concurrent_jobs = 2
/// default_job_duration = "30s"
///
/// [variables]
/// REGISTRY = "registry.local"
/// DEPLOY_TOKEN = { value = "s3cret", masked = true }
///
/// [environments.production]
/// url = "https://example.com"
///
/// [[runner]]
/// id = "docker-1"
/// tags = ["docker", "linux"]
/// max_jobs = 2
/// executor = { kind = "docker", image = "rust:1.80" }
///
/// [[pipeline]]
/// id = "main"
/// ref = "main"
///
/// [[pipeline.stage]]
/// name = "build"
///
/// [[pipeline.stage.job]]
/// name = "compile"
/// script = ["cargo build --release"]
/// duration = "2m"
///
/// [[schedule]]
/// id = "nightly"
/// pipeline = "main"
/// cron = "0 2 * * *"
/// ```
///
/// Every section is optional. Array tables accept both the singular TOML
/// style (`[[runner]]`) and the plural keys YAML documents use (`runners:`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub settings: SettingsSection,

    #[serde(default)]
    pub variables: BTreeMap<String, VariableConfig>,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,

    #[serde(default, rename = "runner", alias = "runners")]
    pub runners: Vec<RunnerConfig>,

    #[serde(default, rename = "pipeline", alias = "pipelines")]
    pub pipelines: Vec<PipelineConfig>,

    #[serde(default, rename = "schedule", alias = "schedules")]
    pub schedules: Vec<ScheduleConfig>,
}

/// `[settings]` section: global toggles.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSection {
    /// With runners disabled every runner-bound job stays pending.
    #[serde(default = "default_true")]
    pub enable_runners: bool,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    #[serde(default = "default_true")]
    pub enable_artifacts: bool,

    /// Default `max_jobs` for runners that do not set one.
    #[serde(default = "default_concurrent_jobs")]
    pub concurrent_jobs: usize,

    /// Synthetic duration for jobs without their own `duration`.
    #[serde(default = "default_job_duration")]
    pub default_job_duration: String,

    /// Keep at most this many terminal executions.
    #[serde(default)]
    pub history_limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

fn default_concurrent_jobs() -> usize {
    1
}

fn default_job_duration() -> String {
    "30s".to_string()
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            enable_runners: true,
            enable_cache: true,
            enable_artifacts: true,
            concurrent_jobs: default_concurrent_jobs(),
            default_job_duration: default_job_duration(),
            history_limit: None,
        }
    }
}

/// A variable is either a bare string or a table with flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VariableConfig {
    Plain(String),
    Detailed {
        value: String,
        #[serde(default)]
        masked: bool,
        #[serde(default)]
        description: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// `production`, `staging`, `testing`, `development` or `other`.
    #[serde(default)]
    pub tier: Option<String>,
}

/// `[[runner]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Falls back to `settings.concurrent_jobs`.
    #[serde(default)]
    pub max_jobs: Option<usize>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Overrides the executor's startup overhead.
    #[serde(default)]
    pub startup: Option<String>,

    /// Overrides the executor's failure rate.
    #[serde(default)]
    pub fail_rate: Option<f64>,
}

/// Executor table, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    Shell {
        #[serde(default)]
        shell: Option<String>,
    },
    Docker {
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        startup: Option<String>,
    },
    Kubernetes {
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        startup: Option<String>,
    },
    Custom {
        driver: String,
        #[serde(default)]
        startup: Option<String>,
        #[serde(default)]
        fail_rate: Option<f64>,
    },
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::Shell { shell: None }
    }
}

/// `[[pipeline]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,

    /// Default trigger source for `start` calls that do not name one.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default, rename = "stage", alias = "stages")]
    pub stages: Vec<StageConfig>,
}

fn default_ref() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default, rename = "job", alias = "jobs")]
    pub jobs: Vec<JobConfig>,
}

/// `[[pipeline.stage.job]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,

    /// `on_success` (default), `on_failure`, `always` or `manual`.
    #[serde(default)]
    pub when: Option<String>,

    #[serde(default)]
    pub allow_failure: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub script: Vec<String>,

    #[serde(default)]
    pub duration: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub fail_rate: Option<f64>,

    #[serde(default)]
    pub retry: u32,

    /// Ref globs the job runs on.
    #[serde(default)]
    pub only: Vec<String>,

    /// Ref globs the job never runs on.
    #[serde(default)]
    pub except: Vec<String>,

    #[serde(default)]
    pub environment: Option<String>,

    /// Pipeline id started as a child pipeline.
    #[serde(default)]
    pub trigger: Option<String>,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub artifacts: Option<ArtifactsConfig>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub key: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    pub paths: Vec<String>,
    #[serde(default)]
    pub expire_in: Option<String>,
}

/// `[[schedule]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Pipeline id to start.
    pub pipeline: String,

    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,

    pub cron: String,

    #[serde(default = "default_true")]
    pub active: bool,

    /// RFC 3339 timestamp.
    #[serde(default)]
    pub last_fired_at: Option<String>,
}

/// Typed global settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub enable_runners: bool,
    pub enable_cache: bool,
    pub enable_artifacts: bool,
    pub concurrent_jobs: usize,
    pub default_job_duration: TimeDelta,
    pub history_limit: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_runners: true,
            enable_cache: true,
            enable_artifacts: true,
            concurrent_jobs: 1,
            default_job_duration: TimeDelta::seconds(30),
            history_limit: None,
        }
    }
}

/// Validated configuration.
///
/// Only produced by `TryFrom<RawConfigFile>` (see `config::validate`), so
/// the engine can rely on every reference resolving and every duration,
/// cron expression and glob being well formed.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: Settings,
    pub variables: Vec<Variable>,
    pub environments: Vec<EnvironmentSpec>,
    pub runners: Vec<RunnerSpec>,
    pub pipelines: Vec<PipelineTemplate>,
    pub schedules: Vec<ScheduleSpec>,
}

impl ConfigFile {
    /// Build a validated config from already-checked parts.
    ///
    /// Use `ConfigFile::try_from(raw)` for untrusted input.
    pub(crate) fn new_unchecked(
        settings: Settings,
        variables: Vec<Variable>,
        environments: Vec<EnvironmentSpec>,
        runners: Vec<RunnerSpec>,
        pipelines: Vec<PipelineTemplate>,
        schedules: Vec<ScheduleSpec>,
    ) -> Self {
        Self {
            settings,
            variables,
            environments,
            runners,
            pipelines,
            schedules,
        }
    }

    /// A config with nothing in it; engines start from this before the first
    /// `update_config`.
    pub fn empty() -> Self {
        Self::new_unchecked(
            Settings::default(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }
}
