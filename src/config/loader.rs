// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::import::{import_yaml, parse_yaml};
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Document format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml` / `.yml` are YAML; everything else is read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Toml,
        }
    }
}

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs deserialization; it does **not** perform semantic
/// validation (references, cron syntax, trigger cycles). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents, ConfigFormat::from_path(path))
}

/// Deserialize config text in the given format.
pub fn parse_str(contents: &str, format: ConfigFormat) -> Result<RawConfigFile> {
    match format {
        ConfigFormat::Toml => Ok(toml::from_str(contents)?),
        ConfigFormat::Yaml => parse_yaml(contents),
    }
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML (or YAML, by extension).
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Validates every section and collects all issues with their paths.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    match ConfigFormat::from_path(path) {
        ConfigFormat::Yaml => import_yaml(&fs::read_to_string(path)?),
        ConfigFormat::Toml => {
            let raw_config = load_from_path(path)?;
            ConfigFile::try_from(raw_config)
        }
    }
}

/// Validate config text; used by hot reload, which already holds the bytes.
pub fn validate_str(contents: &str, format: ConfigFormat) -> Result<ConfigFile> {
    match format {
        ConfigFormat::Yaml => import_yaml(contents),
        ConfigFormat::Toml => ConfigFile::try_from(parse_str(contents, format)?),
    }
}

/// Default config path: `Pipesim.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipesim.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("ci.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("ci.YAML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("Pipesim.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("noext")), ConfigFormat::Toml);
    }

    #[test]
    fn loads_toml_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [[runner]]
            id = "r1"
            tags = ["docker"]

            [[pipeline]]
            id = "main"
            [[pipeline.stage]]
            name = "build"
            [[pipeline.stage.job]]
            name = "compile"
            tags = ["docker"]
            "#
        )
        .unwrap();

        let cfg = load_and_validate(file.path()).unwrap();
        assert_eq!(cfg.runners.len(), 1);
        assert_eq!(cfg.pipelines[0].id, "main");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_and_validate("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, crate::errors::EngineError::Io(_)));
    }
}
