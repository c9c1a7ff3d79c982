// src/runner/profile.rs

//! Executor kinds and their resolved simulation profiles.

use std::fmt;

use chrono::TimeDelta;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Shell,
    Docker,
    Kubernetes,
    Custom,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorKind::Shell => "shell",
            ExecutorKind::Docker => "docker",
            ExecutorKind::Kubernetes => "kubernetes",
            ExecutorKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Fully resolved executor settings used by the dispatcher.
///
/// Built by `config::resolve` from kind defaults, the configured executor
/// table and per-runner overrides, in that order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorProfile {
    pub kind: ExecutorKind,
    /// Free-form label shown in job logs (shell path, custom driver name).
    pub label: Option<String>,
    pub image: Option<String>,
    pub namespace: Option<String>,
    /// Added to every job's synthetic duration.
    #[serde(serialize_with = "serialize_secs")]
    pub startup: TimeDelta,
    /// Probability in [0, 1] that a job without its own rate fails.
    pub fail_rate: f64,
}

impl ExecutorProfile {
    /// Built-in defaults for each executor kind.
    pub fn defaults_for(kind: ExecutorKind) -> Self {
        match kind {
            ExecutorKind::Shell => Self {
                kind,
                label: Some("sh".to_string()),
                image: None,
                namespace: None,
                startup: TimeDelta::zero(),
                fail_rate: 0.0,
            },
            ExecutorKind::Docker => Self {
                kind,
                label: None,
                image: Some("alpine:latest".to_string()),
                namespace: None,
                startup: TimeDelta::seconds(5),
                fail_rate: 0.0,
            },
            ExecutorKind::Kubernetes => Self {
                kind,
                label: None,
                image: Some("alpine:latest".to_string()),
                namespace: Some("default".to_string()),
                startup: TimeDelta::seconds(10),
                fail_rate: 0.0,
            },
            ExecutorKind::Custom => Self {
                kind,
                label: None,
                image: None,
                namespace: None,
                startup: TimeDelta::zero(),
                fail_rate: 0.0,
            },
        }
    }
}

pub(crate) fn serialize_secs<S: Serializer>(d: &TimeDelta, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.num_milliseconds() as f64 / 1000.0)
}
