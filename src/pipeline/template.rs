// src/pipeline/template.rs

//! Immutable pipeline definitions.
//!
//! Templates are built once by config validation and shared behind `Arc`:
//! each execution keeps the snapshot it was created from, so reconfiguration
//! never changes a pipeline that is already running.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::types::{PipelineSource, TemplateId, WhenPolicy};

/// Compiled `only` / `except` ref patterns.
#[derive(Clone)]
pub struct RefFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl RefFilter {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            patterns: patterns.to_vec(),
            set: builder.build()?,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_match(&self, git_ref: &str) -> bool {
        self.set.is_match(git_ref)
    }
}

impl PartialEq for RefFilter {
    fn eq(&self, other: &Self) -> bool {
        self.patterns == other.patterns
    }
}

impl fmt::Debug for RefFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefFilter").field(&self.patterns).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSpec {
    /// May reference variables, e.g. `deps-$CI_COMMIT_REF_NAME`.
    pub key: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSpec {
    pub paths: Vec<String>,
    pub expire_in: Option<TimeDelta>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    pub name: String,
    pub stage: String,
    pub when: WhenPolicy,
    pub allow_failure: bool,
    pub tags: BTreeSet<String>,
    pub script: Vec<String>,
    /// Falls back to `settings.default_job_duration` when unset.
    pub duration: Option<TimeDelta>,
    pub timeout: Option<TimeDelta>,
    /// Overrides the runner profile's rate when set.
    pub fail_rate: Option<f64>,
    /// Automatic retries after a failed attempt.
    pub retry: u32,
    pub only: Option<RefFilter>,
    pub except: Option<RefFilter>,
    pub environment: Option<String>,
    /// Template id of the child pipeline this job starts instead of running
    /// on a runner.
    pub trigger: Option<TemplateId>,
    pub cache: Option<CacheSpec>,
    pub artifacts: Option<ArtifactSpec>,
    pub variables: BTreeMap<String, String>,
}

impl JobTemplate {
    /// Whether the job is instantiated for an execution on `git_ref`.
    pub fn applies_to(&self, git_ref: &str) -> bool {
        if let Some(only) = &self.only {
            if !only.is_match(git_ref) {
                return false;
            }
        }
        if let Some(except) = &self.except {
            if except.is_match(git_ref) {
                return false;
            }
        }
        true
    }

    pub fn is_trigger(&self) -> bool {
        self.trigger.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageTemplate {
    pub name: String,
    pub jobs: Vec<Arc<JobTemplate>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTemplate {
    pub id: TemplateId,
    pub description: Option<String>,
    /// Branch or tag executions run against unless the caller overrides it.
    pub git_ref: String,
    pub source: PipelineSource,
    pub stages: Vec<StageTemplate>,
    pub variables: BTreeMap<String, String>,
}

impl PipelineTemplate {
    pub fn jobs(&self) -> impl Iterator<Item = &Arc<JobTemplate>> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    /// Template ids this template starts as child pipelines.
    pub fn trigger_targets(&self) -> impl Iterator<Item = &str> {
        self.jobs().filter_map(|j| j.trigger.as_deref())
    }
}

/// What a template reconfiguration changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDelta {
    pub added: Vec<TemplateId>,
    pub removed: Vec<TemplateId>,
    pub updated: Vec<TemplateId>,
}

impl TemplateDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Current template set, in config order.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: Vec<Arc<PipelineTemplate>>,
}

impl TemplateStore {
    pub fn new(templates: Vec<PipelineTemplate>) -> Self {
        Self {
            templates: templates.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PipelineTemplate>> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PipelineTemplate>> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Replace the template set, keeping the existing `Arc` for templates
    /// that did not change.
    pub fn reconcile(&mut self, next: Vec<PipelineTemplate>) -> TemplateDelta {
        let mut delta = TemplateDelta::default();
        let mut merged = Vec::with_capacity(next.len());

        for template in next {
            match self.get(&template.id) {
                Some(existing) if **existing == template => merged.push(Arc::clone(existing)),
                Some(_) => {
                    delta.updated.push(template.id.clone());
                    merged.push(Arc::new(template));
                }
                None => {
                    delta.added.push(template.id.clone());
                    merged.push(Arc::new(template));
                }
            }
        }

        for old in &self.templates {
            if !merged.iter().any(|t| t.id == old.id) {
                delta.removed.push(old.id.clone());
            }
        }

        debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            updated = delta.updated.len(),
            "template store reconciled"
        );
        self.templates = merged;
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> JobTemplate {
        JobTemplate {
            name: name.to_string(),
            stage: "build".to_string(),
            when: WhenPolicy::OnSuccess,
            allow_failure: false,
            tags: BTreeSet::new(),
            script: vec![],
            duration: None,
            timeout: None,
            fail_rate: None,
            retry: 0,
            only: None,
            except: None,
            environment: None,
            trigger: None,
            cache: None,
            artifacts: None,
            variables: BTreeMap::new(),
        }
    }

    fn template(id: &str, jobs: &[&str]) -> PipelineTemplate {
        PipelineTemplate {
            id: id.to_string(),
            description: None,
            git_ref: "main".to_string(),
            source: PipelineSource::Push,
            stages: vec![StageTemplate {
                name: "build".to_string(),
                jobs: jobs.iter().map(|j| Arc::new(job(j))).collect(),
            }],
            variables: BTreeMap::new(),
        }
    }

    #[test]
    fn only_and_except_filters() {
        let mut j = job("deploy");
        j.only = Some(RefFilter::new(&["main".into(), "release/*".into()]).unwrap());
        j.except = Some(RefFilter::new(&["release/legacy".into()]).unwrap());

        assert!(j.applies_to("main"));
        assert!(j.applies_to("release/1.2"));
        assert!(!j.applies_to("release/legacy"));
        assert!(!j.applies_to("feature/x"));
    }

    #[test]
    fn reconcile_keeps_unchanged_snapshots() {
        let mut store = TemplateStore::new(vec![template("a", &["x"]), template("b", &["y"])]);
        let a_before = Arc::clone(store.get("a").unwrap());

        let delta = store.reconcile(vec![
            template("a", &["x"]),
            template("b", &["y", "z"]),
            template("c", &["w"]),
        ]);

        assert!(Arc::ptr_eq(&a_before, store.get("a").unwrap()));
        assert_eq!(delta.updated, vec!["b".to_string()]);
        assert_eq!(delta.added, vec!["c".to_string()]);

        let delta = store.reconcile(vec![template("c", &["w"])]);
        assert_eq!(delta.removed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len(), 1);
    }
}
