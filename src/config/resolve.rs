// src/config/resolve.rs

//! Runner executor resolution: kind defaults ⊕ executor table ⊕ runner
//! overrides, folded into one concrete [`ExecutorProfile`].

use chrono::TimeDelta;

use crate::config::model::ExecutorConfig;
use crate::runner::{ExecutorKind, ExecutorProfile};

/// Per-runner fields that apply to any executor kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunnerOverrides {
    pub startup: Option<TimeDelta>,
    pub fail_rate: Option<f64>,
}

/// Executor table fields after duration parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorSettings {
    Shell {
        shell: Option<String>,
    },
    Docker {
        image: Option<String>,
        startup: Option<TimeDelta>,
    },
    Kubernetes {
        namespace: Option<String>,
        image: Option<String>,
        startup: Option<TimeDelta>,
    },
    Custom {
        driver: String,
        startup: Option<TimeDelta>,
        fail_rate: Option<f64>,
    },
}

impl ExecutorSettings {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            ExecutorSettings::Shell { .. } => ExecutorKind::Shell,
            ExecutorSettings::Docker { .. } => ExecutorKind::Docker,
            ExecutorSettings::Kubernetes { .. } => ExecutorKind::Kubernetes,
            ExecutorSettings::Custom { .. } => ExecutorKind::Custom,
        }
    }

    /// Parse the startup strings of a raw executor table.
    pub fn from_config(
        cfg: &ExecutorConfig,
        parse: impl Fn(&str) -> Result<TimeDelta, String>,
    ) -> Result<Self, String> {
        let startup = |s: &Option<String>| s.as_deref().map(&parse).transpose();
        Ok(match cfg {
            ExecutorConfig::Shell { shell } => ExecutorSettings::Shell {
                shell: shell.clone(),
            },
            ExecutorConfig::Docker { image, startup: s } => ExecutorSettings::Docker {
                image: image.clone(),
                startup: startup(s)?,
            },
            ExecutorConfig::Kubernetes {
                namespace,
                image,
                startup: s,
            } => ExecutorSettings::Kubernetes {
                namespace: namespace.clone(),
                image: image.clone(),
                startup: startup(s)?,
            },
            ExecutorConfig::Custom {
                driver,
                startup: s,
                fail_rate,
            } => ExecutorSettings::Custom {
                driver: driver.clone(),
                startup: startup(s)?,
                fail_rate: *fail_rate,
            },
        })
    }
}

/// Resolve a runner's executor into a concrete profile.
pub fn resolve_profile(settings: &ExecutorSettings, overrides: RunnerOverrides) -> ExecutorProfile {
    let mut profile = ExecutorProfile::defaults_for(settings.kind());

    match settings {
        ExecutorSettings::Shell { shell } => {
            if let Some(shell) = shell {
                profile.label = Some(shell.clone());
            }
        }
        ExecutorSettings::Docker { image, startup } => {
            if let Some(image) = image {
                profile.image = Some(image.clone());
            }
            if let Some(startup) = startup {
                profile.startup = *startup;
            }
        }
        ExecutorSettings::Kubernetes {
            namespace,
            image,
            startup,
        } => {
            if let Some(namespace) = namespace {
                profile.namespace = Some(namespace.clone());
            }
            if let Some(image) = image {
                profile.image = Some(image.clone());
            }
            if let Some(startup) = startup {
                profile.startup = *startup;
            }
        }
        ExecutorSettings::Custom {
            driver,
            startup,
            fail_rate,
        } => {
            profile.label = Some(driver.clone());
            if let Some(startup) = startup {
                profile.startup = *startup;
            }
            if let Some(rate) = fail_rate {
                profile.fail_rate = *rate;
            }
        }
    }

    if let Some(startup) = overrides.startup {
        profile.startup = startup;
    }
    if let Some(rate) = overrides.fail_rate {
        profile.fail_rate = rate;
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_defaults_apply_when_nothing_is_set() {
        let p = resolve_profile(
            &ExecutorSettings::Kubernetes {
                namespace: None,
                image: None,
                startup: None,
            },
            RunnerOverrides::default(),
        );
        assert_eq!(p.kind, ExecutorKind::Kubernetes);
        assert_eq!(p.namespace.as_deref(), Some("default"));
        assert_eq!(p.image.as_deref(), Some("alpine:latest"));
        assert_eq!(p.startup, TimeDelta::seconds(10));
    }

    #[test]
    fn profile_then_overrides_win() {
        let settings = ExecutorSettings::Docker {
            image: Some("rust:1.80".into()),
            startup: Some(TimeDelta::seconds(2)),
        };
        let p = resolve_profile(&settings, RunnerOverrides::default());
        assert_eq!(p.image.as_deref(), Some("rust:1.80"));
        assert_eq!(p.startup, TimeDelta::seconds(2));

        let p = resolve_profile(
            &settings,
            RunnerOverrides {
                startup: Some(TimeDelta::zero()),
                fail_rate: Some(0.25),
            },
        );
        assert_eq!(p.startup, TimeDelta::zero());
        assert_eq!(p.fail_rate, 0.25);
        assert_eq!(p.image.as_deref(), Some("rust:1.80"));
    }

    #[test]
    fn custom_driver_becomes_label() {
        let p = resolve_profile(
            &ExecutorSettings::Custom {
                driver: "libvirt".into(),
                startup: None,
                fail_rate: Some(0.1),
            },
            RunnerOverrides::default(),
        );
        assert_eq!(p.label.as_deref(), Some("libvirt"));
        assert_eq!(p.fail_rate, 0.1);
    }
}
