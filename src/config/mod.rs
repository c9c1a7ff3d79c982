// src/config/mod.rs

//! Configuration: serde model, loading, YAML import, validation and
//! executor resolution.

pub mod duration;
pub mod import;
pub mod loader;
pub mod model;
pub mod resolve;
pub mod validate;

pub use import::import_yaml;
pub use loader::{ConfigFormat, default_config_path, load_and_validate, load_from_path};
pub use model::{
    ArtifactsConfig, CacheConfig, ConfigFile, EnvironmentConfig, ExecutorConfig, JobConfig,
    PipelineConfig, RawConfigFile, RunnerConfig, ScheduleConfig, Settings, SettingsSection,
    StageConfig, VariableConfig,
};
