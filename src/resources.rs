// src/resources.rs

//! Passive records: variables, environments and their deployments.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{JobId, PipelineId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub key: String,
    pub value: String,
    pub masked: bool,
    pub description: Option<String>,
}

impl Variable {
    /// Value as it may be shown to a user.
    pub fn display_value(&self) -> &str {
        if self.masked {
            crate::pipeline::variables::MASKED
        } else {
            &self.value
        }
    }
}

// Serialized views never carry masked values.
impl Serialize for Variable {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut st = s.serialize_struct("Variable", 4)?;
        st.serialize_field("key", &self.key)?;
        st.serialize_field("value", self.display_value())?;
        st.serialize_field("masked", &self.masked)?;
        st.serialize_field("description", &self.description)?;
        st.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: String,
    pub url: Option<String>,
    pub tier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub job_name: String,
    pub git_ref: String,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub name: String,
    pub url: Option<String>,
    pub tier: Option<String>,
    pub last_deployment: Option<Deployment>,
    pub deployments: u64,
}

impl Environment {
    pub fn from_spec(spec: &EnvironmentSpec) -> Self {
        Self {
            name: spec.name.clone(),
            url: spec.url.clone(),
            tier: spec.tier.clone(),
            last_deployment: None,
            deployments: 0,
        }
    }

    /// Environment referenced by a job but never declared.
    pub fn ad_hoc(name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: None,
            tier: None,
            last_deployment: None,
            deployments: 0,
        }
    }

    pub fn record(&mut self, deployment: Deployment) {
        self.deployments += 1;
        self.last_deployment = Some(deployment);
    }
}
