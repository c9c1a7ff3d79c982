#![allow(dead_code)]

use std::collections::BTreeMap;

use pipesim::config::{
    ArtifactsConfig, CacheConfig, ConfigFile, ExecutorConfig, JobConfig, PipelineConfig,
    RawConfigFile, RunnerConfig, ScheduleConfig, StageConfig, VariableConfig,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.config.runners.push(runner);
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.config.pipelines.push(pipeline);
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.config.schedules.push(schedule);
        self
    }

    pub fn with_variable(mut self, key: &str, value: &str) -> Self {
        self.config
            .variables
            .insert(key.to_string(), VariableConfig::Plain(value.to_string()));
        self
    }

    pub fn with_masked_variable(mut self, key: &str, value: &str) -> Self {
        self.config.variables.insert(
            key.to_string(),
            VariableConfig::Detailed {
                value: value.to_string(),
                masked: true,
                description: None,
            },
        );
        self
    }

    pub fn default_job_duration(mut self, duration: &str) -> Self {
        self.config.settings.default_job_duration = duration.to_string();
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.settings.history_limit = Some(limit);
        self
    }

    pub fn enable_runners(mut self, val: bool) -> Self {
        self.config.settings.enable_runners = val;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RunnerConfig`. Defaults to a shell runner with one slot.
pub struct RunnerBuilder {
    runner: RunnerConfig,
}

impl RunnerBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            runner: RunnerConfig {
                id: id.to_string(),
                description: None,
                tags: vec![],
                max_jobs: Some(1),
                active: true,
                executor: ExecutorConfig::default(),
                startup: None,
                fail_rate: None,
            },
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.runner.tags.push(tag.to_string());
        self
    }

    pub fn max_jobs(mut self, n: usize) -> Self {
        self.runner.max_jobs = Some(n);
        self
    }

    pub fn active(mut self, val: bool) -> Self {
        self.runner.active = val;
        self
    }

    pub fn docker(mut self, image: &str) -> Self {
        self.runner.executor = ExecutorConfig::Docker {
            image: Some(image.to_string()),
            startup: Some("0s".to_string()),
        };
        self
    }

    pub fn fail_rate(mut self, rate: f64) -> Self {
        self.runner.fail_rate = Some(rate);
        self
    }

    pub fn build(self) -> RunnerConfig {
        self.runner
    }
}

/// Builder for `PipelineConfig`. Stages are created on first use, in order.
pub struct PipelineBuilder {
    pipeline: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            pipeline: PipelineConfig {
                id: id.to_string(),
                description: None,
                git_ref: "main".to_string(),
                source: None,
                variables: BTreeMap::new(),
                stages: vec![],
            },
        }
    }

    pub fn git_ref(mut self, git_ref: &str) -> Self {
        self.pipeline.git_ref = git_ref.to_string();
        self
    }

    pub fn variable(mut self, key: &str, value: &str) -> Self {
        self.pipeline
            .variables
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Add `job` to `stage`, creating the stage after the existing ones.
    pub fn job(mut self, stage: &str, job: JobConfig) -> Self {
        match self.pipeline.stages.iter_mut().find(|s| s.name == stage) {
            Some(existing) => existing.jobs.push(job),
            None => self.pipeline.stages.push(StageConfig {
                name: stage.to_string(),
                jobs: vec![job],
            }),
        }
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.pipeline
    }
}

/// Builder for `JobConfig`. Defaults to a 60s job that never fails.
pub struct JobBuilder {
    job: JobConfig,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            job: JobConfig {
                name: name.to_string(),
                when: None,
                allow_failure: false,
                tags: vec![],
                script: vec![format!("echo {name}")],
                duration: Some("60s".to_string()),
                timeout: None,
                fail_rate: Some(0.0),
                retry: 0,
                only: vec![],
                except: vec![],
                environment: None,
                trigger: None,
                cache: None,
                artifacts: None,
                variables: BTreeMap::new(),
            },
        }
    }

    pub fn when(mut self, when: &str) -> Self {
        self.job.when = Some(when.to_string());
        self
    }

    pub fn manual(self) -> Self {
        self.when("manual")
    }

    pub fn allow_failure(mut self) -> Self {
        self.job.allow_failure = true;
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.job.tags.push(tag.to_string());
        self
    }

    pub fn script(mut self, line: &str) -> Self {
        self.job.script.push(line.to_string());
        self
    }

    pub fn duration(mut self, duration: &str) -> Self {
        self.job.duration = Some(duration.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.job.timeout = Some(timeout.to_string());
        self
    }

    /// Always fails its failure draw.
    pub fn failing(mut self) -> Self {
        self.job.fail_rate = Some(1.0);
        self
    }

    pub fn retry(mut self, n: u32) -> Self {
        self.job.retry = n;
        self
    }

    pub fn only(mut self, pattern: &str) -> Self {
        self.job.only.push(pattern.to_string());
        self
    }

    pub fn except(mut self, pattern: &str) -> Self {
        self.job.except.push(pattern.to_string());
        self
    }

    pub fn environment(mut self, env: &str) -> Self {
        self.job.environment = Some(env.to_string());
        self
    }

    /// Turn this into a trigger job for `pipeline`.
    pub fn trigger(mut self, pipeline: &str) -> Self {
        self.job.trigger = Some(pipeline.to_string());
        self.job.script.clear();
        self
    }

    pub fn cache(mut self, key: &str) -> Self {
        self.job.cache = Some(CacheConfig {
            key: key.to_string(),
            paths: vec!["target/".to_string()],
        });
        self
    }

    pub fn artifacts(mut self, path: &str, expire_in: Option<&str>) -> Self {
        self.job.artifacts = Some(ArtifactsConfig {
            paths: vec![path.to_string()],
            expire_in: expire_in.map(str::to_string),
        });
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Builder for `ScheduleConfig`.
pub struct ScheduleBuilder {
    schedule: ScheduleConfig,
}

impl ScheduleBuilder {
    pub fn new(id: &str, pipeline: &str, cron: &str) -> Self {
        Self {
            schedule: ScheduleConfig {
                id: id.to_string(),
                description: String::new(),
                pipeline: pipeline.to_string(),
                git_ref: None,
                cron: cron.to_string(),
                active: true,
                last_fired_at: None,
            },
        }
    }

    pub fn git_ref(mut self, git_ref: &str) -> Self {
        self.schedule.git_ref = Some(git_ref.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.schedule.active = false;
        self
    }

    pub fn build(self) -> ScheduleConfig {
        self.schedule
    }
}
