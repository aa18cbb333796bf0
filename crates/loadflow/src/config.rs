//! Pipeline-level configuration.

use loadflow_protocol::config::resolve_fields;
use loadflow_protocol::defaults::DEFAULT_DESTINATION;
use loadflow_protocol::paths::pipeline_dir;
use loadflow_protocol::{ConfigError, ConfigField, ConfigProvider};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Names the working directory. Letters, digits, `_` and `-` only.
    pub pipeline_name: String,
    /// Bare or qualified destination name, resolved through the registry.
    pub destination: String,
    /// Defaults to `<home>/pipelines/<pipeline_name>`.
    pub working_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub const NAMESPACE: &'static str = "pipeline";

    pub const FIELDS: &'static [ConfigField] = &[
        ConfigField::required_value("pipeline_name"),
        ConfigField::value("destination"),
        ConfigField::value("working_dir"),
    ];

    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            destination: DEFAULT_DESTINATION.to_string(),
            working_dir: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn resolve(providers: &[&dyn ConfigProvider]) -> Result<Self, ConfigError> {
        let values = resolve_fields(Self::FIELDS, &[Self::NAMESPACE], providers)?;
        let pipeline_name = values
            .value("pipeline_name")
            .ok_or_else(|| ConfigError::invalid("pipeline_name", "missing"))?;

        let mut config = Self::new(pipeline_name);
        if let Some(destination) = values.value("destination") {
            config.destination = destination.to_string();
        }
        config.working_dir = values.value("working_dir").map(PathBuf::from);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_name.is_empty() {
            return Err(ConfigError::invalid("pipeline_name", "must not be empty"));
        }
        if let Some(bad) = self
            .pipeline_name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(ConfigError::invalid(
                "pipeline_name",
                format!("unexpected character '{}'", bad),
            ));
        }
        if self.destination.trim().is_empty() {
            return Err(ConfigError::invalid("destination", "must not be empty"));
        }
        Ok(())
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| pipeline_dir(&self.pipeline_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadflow_protocol::DictionaryProvider;

    #[test]
    fn test_resolve_with_defaults() {
        let provider = DictionaryProvider::new().with(&["pipeline"], "pipeline_name", "events");
        let config = PipelineConfig::resolve(&[&provider]).unwrap();
        assert_eq!(config, PipelineConfig::new("events"));
        assert_eq!(config.destination, "filesystem");
    }

    #[test]
    fn test_resolve_overrides() {
        let provider = DictionaryProvider::new()
            .with(&["pipeline"], "pipeline_name", "events")
            .with(&["pipeline"], "destination", "loadflow.destinations.dummy")
            .with(&["pipeline"], "working_dir", "/tmp/events");
        let config = PipelineConfig::resolve(&[&provider]).unwrap();
        assert_eq!(config.destination, "loadflow.destinations.dummy");
        assert_eq!(config.working_dir(), PathBuf::from("/tmp/events"));
    }

    #[test]
    fn test_missing_name() {
        let err = PipelineConfig::resolve(&[&DictionaryProvider::new()]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_name_must_be_a_folder_name() {
        let provider = DictionaryProvider::new().with(&["pipeline"], "pipeline_name", "../etc");
        let err = PipelineConfig::resolve(&[&provider]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
