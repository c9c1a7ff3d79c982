// src/config/import.rs

//! YAML import into the same config shape the TOML loader produces.
//!
//! Syntax errors are reported as a single validation issue located at the
//! line and column serde_yaml points to, so importers get the same
//! `(path, message)` shape as semantic errors.

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{EngineError, Result, ValidationErrors};

/// Parse YAML text into a raw config.
pub fn parse_yaml(text: &str) -> Result<RawConfigFile> {
    serde_yaml::from_str(text).map_err(|e| {
        let path = match e.location() {
            Some(loc) => format!("line {} column {}", loc.line(), loc.column()),
            None => "$".to_string(),
        };
        EngineError::Validation(ValidationErrors::single(path, e.to_string()))
    })
}

/// Parse and validate YAML text. Nothing is returned unless the whole
/// document is valid.
pub fn import_yaml(text: &str) -> Result<ConfigFile> {
    ConfigFile::try_from(parse_yaml(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WhenPolicy;

    #[test]
    fn imports_plural_yaml_keys() {
        let cfg = import_yaml(
            r#"
settings:
  concurrent_jobs: 2
variables:
  REGISTRY: registry.local
runners:
  - id: shared
    tags: [docker]
    executor:
      kind: docker
      image: node:20
pipelines:
  - id: web
    ref: develop
    stages:
      - name: test
        jobs:
          - name: unit
            tags: [docker]
            script: ["npm test"]
      - name: deploy
        jobs:
          - name: release
            when: manual
schedules:
  - id: hourly
    pipeline: web
    cron: "0 * * * *"
"#,
        )
        .unwrap();

        assert_eq!(cfg.runners[0].max_jobs, 2);
        assert_eq!(cfg.runners[0].profile.image.as_deref(), Some("node:20"));
        assert_eq!(cfg.pipelines[0].git_ref, "develop");
        assert_eq!(cfg.pipelines[0].stages[1].jobs[0].when, WhenPolicy::Manual);
        assert_eq!(cfg.schedules[0].template_id, "web");
    }

    #[test]
    fn syntax_errors_carry_a_location() {
        let err = import_yaml("pipelines:\n  - id: [unclosed\n").unwrap_err();
        match err {
            EngineError::Validation(errors) => {
                assert_eq!(errors.issues().len(), 1);
                assert!(errors.issues()[0].path.starts_with("line "));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn semantic_errors_reject_the_whole_document() {
        let err = import_yaml(
            r#"
schedules:
  - id: broken
    pipeline: nowhere
    cron: "not a cron"
"#,
        )
        .unwrap_err();
        let EngineError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_path("schedule[0].pipeline"));
        assert!(errors.has_path("schedule[0].cron"));
    }
}
