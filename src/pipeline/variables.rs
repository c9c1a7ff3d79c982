// src/pipeline/variables.rs

//! Layered CI variables and `$VAR` / `${VAR}` expansion.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::pipeline::execution::Job;
use crate::pipeline::template::PipelineTemplate;
use crate::resources::Variable;
use crate::types::{PipelineId, PipelineSource};

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable reference pattern is valid")
});

pub const MASKED: &str = "[MASKED]";

/// Execution facts a job's variables are derived from.
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    pub pipeline_id: PipelineId,
    pub iid: u64,
    pub git_ref: &'a str,
    pub source: PipelineSource,
    pub template: &'a PipelineTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    masked: bool,
}

/// Variables visible to one job. Later layers override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    entries: BTreeMap<String, Entry>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                masked: false,
            },
        );
        self
    }

    /// Project-level variables, keeping their masked flag.
    pub fn extend_project(&mut self, vars: &[Variable]) -> &mut Self {
        for var in vars {
            self.entries.insert(
                var.key.clone(),
                Entry {
                    value: var.value.clone(),
                    masked: var.masked,
                },
            );
        }
        self
    }

    pub fn extend_plain(&mut self, vars: &BTreeMap<String, String>) -> &mut Self {
        for (key, value) in vars {
            self.set(key.clone(), value.clone());
        }
        self
    }

    /// Variables for one job: predefined `CI_*` values, then template, job
    /// and project variables. Project variables win.
    pub fn for_job(project: &[Variable], ctx: &PipelineContext<'_>, job: &Job) -> Self {
        let mut vars = Self::new();
        vars.set("CI", "true")
            .set("CI_PIPELINE_ID", ctx.pipeline_id.to_string())
            .set("CI_PIPELINE_IID", ctx.iid.to_string())
            .set("CI_PIPELINE_SOURCE", ctx.source.to_string())
            .set("CI_COMMIT_REF_NAME", ctx.git_ref)
            .set("CI_PIPELINE_NAME", ctx.template.id.clone())
            .set("CI_JOB_ID", job.id.to_string())
            .set("CI_JOB_NAME", job.name.clone())
            .set("CI_JOB_STAGE", job.stage.clone());
        if let Some(env) = &job.environment {
            vars.set("CI_ENVIRONMENT_NAME", env.clone());
        }
        vars.extend_plain(&ctx.template.variables)
            .extend_plain(&job.spec.variables)
            .extend_project(project);
        vars
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.value.as_str())
    }

    pub fn is_masked(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.masked)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand references with real values. Unknown variables expand to the
    /// empty string, as a shell would.
    pub fn expand(&self, text: &str) -> String {
        self.expand_with(text, false)
    }

    /// Expand references for display: masked values become `[MASKED]`.
    pub fn expand_masked(&self, text: &str) -> String {
        self.expand_with(text, true)
    }

    fn expand_with(&self, text: &str, mask: bool) -> String {
        VAR_REF
            .replace_all(text, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.entries.get(name) {
                    Some(entry) if mask && entry.masked => MASKED.to_string(),
                    Some(entry) => entry.value.clone(),
                    None => String::new(),
                }
            })
            .into_owned()
    }
}
