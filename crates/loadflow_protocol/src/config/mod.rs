//! Stage configuration.
//!
//! Every configuration struct declares its fields statically as a list of
//! [`ConfigField`]s, marking which are secrets and which are required. Values
//! are resolved through [`ConfigProvider`]s in priority order; a lookup walks
//! from the most specific namespace path to the bare key.

pub mod providers;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::defaults::{
    DEFAULT_LOAD_WORKERS, DEFAULT_MAX_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RETRY_BACKOFF_BASE_MS, DEFAULT_RETRY_BACKOFF_MAX_MS, DEFAULT_RETRY_LIMIT,
};
use crate::types::LoaderFileFormat;
pub use providers::{ConfigProvider, DictionaryProvider, EnvironmentProvider};

/// Configuration errors. Always fatal for the stage being configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required config field '{field}' (looked up: {})", .lookups.join(", "))]
    MissingField { field: String, lookups: Vec<String> },

    #[error("Invalid value for config field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Secret field '{field}' cannot be read from provider '{provider}'")]
    SecretNotSupported { field: String, provider: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Field schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain value, safe to log.
    Value,
    /// Credential material. Never logged, redacted in `Debug`.
    Secret,
}

/// Static description of one configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl ConfigField {
    pub const fn value(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Value,
            required: false,
        }
    }

    pub const fn required_value(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Value,
            required: true,
        }
    }

    pub const fn secret(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Secret,
            required: false,
        }
    }

    pub const fn required_secret(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Secret,
            required: true,
        }
    }

    pub fn is_secret(&self) -> bool {
        self.kind == FieldKind::Secret
    }
}

/// String that never prints its contents.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

/// Values resolved for a field list, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedValues {
    values: BTreeMap<&'static str, String>,
    secrets: BTreeMap<&'static str, SecretString>,
}

impl ResolvedValues {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn secret(&self, field: &str) -> Option<&SecretString> {
        self.secrets.get(field)
    }

    pub fn parse<T>(&self, field: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.value(field) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(field, e.to_string())),
            None => Ok(None),
        }
    }

    pub fn into_parts(
        self,
    ) -> (
        BTreeMap<&'static str, String>,
        BTreeMap<&'static str, SecretString>,
    ) {
        (self.values, self.secrets)
    }
}

/// Resolve `fields` under `namespaces` from `providers` (first hit wins).
///
/// For namespaces `[a, b]` and field `f` the lookup order is `a__b__f`,
/// `a__f`, `f` in each provider.
pub fn resolve_fields(
    fields: &[ConfigField],
    namespaces: &[&str],
    providers: &[&dyn ConfigProvider],
) -> Result<ResolvedValues, ConfigError> {
    let mut resolved = ResolvedValues::default();

    for field in fields {
        let mut lookups = Vec::new();
        let mut found = None;

        'search: for depth in (0..=namespaces.len()).rev() {
            let ns = &namespaces[..depth];
            for provider in providers {
                let (value, key) = provider.get_value(field.name, ns);
                lookups.push(format!("{} in {}", key, provider.name()));
                if let Some(value) = value {
                    if field.is_secret() && !provider.supports_secrets() {
                        return Err(ConfigError::SecretNotSupported {
                            field: field.name.to_string(),
                            provider: provider.name().to_string(),
                        });
                    }
                    found = Some(value);
                    break 'search;
                }
            }
        }

        match found {
            Some(value) if field.is_secret() => {
                debug!(field = field.name, "Resolved secret config field");
                resolved.secrets.insert(field.name, SecretString::new(value));
            }
            Some(value) => {
                debug!(field = field.name, value = %value, "Resolved config field");
                resolved.values.insert(field.name, value);
            }
            None if field.required => {
                return Err(ConfigError::MissingField {
                    field: field.name.to_string(),
                    lookups,
                });
            }
            None => {}
        }
    }

    Ok(resolved)
}

// ============================================================================
// Stage configurations
// ============================================================================

/// Load stage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Maximum number of jobs in flight at once.
    pub workers: usize,
    /// First wait between status polls of a running job.
    pub poll_interval: Duration,
    /// Upper bound for the poll backoff.
    pub max_poll_interval: Duration,
    /// How many times a job in `Retry` is re-submitted before it fails.
    pub retry_limit: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_LOAD_WORKERS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_poll_interval: Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS),
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_backoff_base: Duration::from_millis(DEFAULT_RETRY_BACKOFF_BASE_MS),
            retry_backoff_max: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MAX_MS),
        }
    }
}

impl LoaderConfig {
    pub const NAMESPACE: &'static str = "load";

    pub const FIELDS: &'static [ConfigField] = &[
        ConfigField::value("workers"),
        ConfigField::value("poll_interval_ms"),
        ConfigField::value("max_poll_interval_ms"),
        ConfigField::value("retry_limit"),
        ConfigField::value("retry_backoff_base_ms"),
        ConfigField::value("retry_backoff_max_ms"),
    ];

    pub fn resolve(providers: &[&dyn ConfigProvider]) -> Result<Self, ConfigError> {
        let values = resolve_fields(Self::FIELDS, &[Self::NAMESPACE], providers)?;
        let defaults = Self::default();
        let ms = |field: &str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(values
                .parse::<u64>(field)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let config = Self {
            workers: values.parse("workers")?.unwrap_or(defaults.workers),
            poll_interval: ms("poll_interval_ms", defaults.poll_interval)?,
            max_poll_interval: ms("max_poll_interval_ms", defaults.max_poll_interval)?,
            retry_limit: values.parse("retry_limit")?.unwrap_or(defaults.retry_limit),
            retry_backoff_base: ms("retry_backoff_base_ms", defaults.retry_backoff_base)?,
            retry_backoff_max: ms("retry_backoff_max_ms", defaults.retry_backoff_max)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval_ms", "must be greater than 0"));
        }
        if self.max_poll_interval < self.poll_interval {
            return Err(ConfigError::invalid(
                "max_poll_interval_ms",
                "must not be smaller than poll_interval_ms",
            ));
        }
        Ok(())
    }

    /// Backoff before re-submitting a job for the `attempt`-th time (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff_base
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
    }
}

/// Normalize stage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// Formats the normalizer is able to write, in no particular order.
    pub producible_formats: Vec<LoaderFileFormat>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            producible_formats: vec![LoaderFileFormat::Jsonl, LoaderFileFormat::InsertValues],
        }
    }
}

impl NormalizeConfig {
    pub const NAMESPACE: &'static str = "normalize";

    pub const FIELDS: &'static [ConfigField] = &[ConfigField::value("producible_formats")];

    pub fn resolve(providers: &[&dyn ConfigProvider]) -> Result<Self, ConfigError> {
        let values = resolve_fields(Self::FIELDS, &[Self::NAMESPACE], providers)?;
        match values.value("producible_formats") {
            Some(raw) => {
                let producible_formats = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<LoaderFileFormat>()
                            .map_err(|e| ConfigError::invalid("producible_formats", e))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self { producible_formats })
            }
            None => Ok(Self::default()),
        }
    }
}

/// Configuration handed to a destination client.
///
/// The base fields are shared by every destination. Destination specific
/// fields are declared by the destination and land in `options` (plain) or
/// `secrets` (credentials).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationClientConfig {
    pub destination_name: String,
    /// Dataset in the destination. Non-default schemas use it as a prefix.
    pub dataset_name: String,
    pub default_schema_name: Option<String>,
    pub options: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, SecretString>,
}

impl DestinationClientConfig {
    pub const NAMESPACE: &'static str = "destination";

    pub const BASE_FIELDS: &'static [ConfigField] = &[
        ConfigField::required_value("dataset_name"),
        ConfigField::value("default_schema_name"),
    ];

    pub fn new(destination_name: impl Into<String>, dataset_name: impl Into<String>) -> Self {
        Self {
            destination_name: destination_name.into(),
            dataset_name: dataset_name.into(),
            default_schema_name: None,
            options: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), SecretString::new(value));
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Resolve base fields plus `destination_fields` under
    /// `destination__<destination_name>`.
    pub fn resolve(
        destination_name: &str,
        destination_fields: &[ConfigField],
        providers: &[&dyn ConfigProvider],
    ) -> Result<Self, ConfigError> {
        let namespaces = [Self::NAMESPACE, destination_name];
        let base = resolve_fields(Self::BASE_FIELDS, &namespaces, providers)?;
        let extra = resolve_fields(destination_fields, &namespaces, providers)?;

        let dataset_name = base
            .value("dataset_name")
            .ok_or_else(|| ConfigError::invalid("dataset_name", "missing"))?
            .to_string();
        let default_schema_name = base.value("default_schema_name").map(str::to_string);

        let (values, secrets) = extra.into_parts();
        Ok(Self {
            destination_name: destination_name.to_string(),
            dataset_name,
            default_schema_name,
            options: values
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            secrets: secrets
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }

    /// Effective dataset for `schema_name`: the default schema loads into
    /// `dataset_name`, any other schema into `<dataset_name>_<schema_name>`.
    pub fn dataset_for_schema(&self, schema_name: &str) -> String {
        match &self.default_schema_name {
            Some(default) if default != schema_name => {
                format!("{}_{}", self.dataset_name, schema_name)
            }
            _ => self.dataset_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_config_defaults_when_unset() {
        let provider = DictionaryProvider::new();
        let config = LoaderConfig::resolve(&[&provider]).unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn test_loader_config_from_dictionary() {
        let provider = DictionaryProvider::new()
            .with(&["load"], "workers", 4)
            .with(&["load"], "poll_interval_ms", 10)
            .with(&["load"], "max_poll_interval_ms", 40)
            .with(&[], "retry_limit", 2);
        let config = LoaderConfig::resolve(&[&provider]).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.max_poll_interval, Duration::from_millis(40));
        // Bare key is found after the namespaced lookup misses
        assert_eq!(config.retry_limit, 2);
    }

    #[test]
    fn test_loader_config_rejects_zero_workers() {
        let provider = DictionaryProvider::new().with(&["load"], "workers", 0);
        let err = LoaderConfig::resolve(&[&provider]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "workers"));
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let config = LoaderConfig {
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_max: Duration::from_millis(300),
            ..LoaderConfig::default()
        };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(300));
        assert_eq!(config.retry_backoff(40), Duration::from_millis(300));
    }

    #[test]
    fn test_normalize_config_parses_format_list() {
        let provider = DictionaryProvider::new().with(
            &["normalize"],
            "producible_formats",
            serde_json::json!(["jsonl", "csv"]),
        );
        let config = NormalizeConfig::resolve(&[&provider]).unwrap();
        assert_eq!(
            config.producible_formats,
            vec![LoaderFileFormat::Jsonl, LoaderFileFormat::Csv]
        );
    }

    #[test]
    fn test_destination_config_requires_dataset() {
        let provider = DictionaryProvider::new();
        let err = DestinationClientConfig::resolve("dummy", &[], &[&provider]).unwrap_err();
        match err {
            ConfigError::MissingField { field, lookups } => {
                assert_eq!(field, "dataset_name");
                assert!(lookups
                    .iter()
                    .any(|l| l.starts_with("destination__dummy__dataset_name")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_destination_config_splits_secrets() {
        const FIELDS: &[ConfigField] = &[
            ConfigField::required_value("bucket_url"),
            ConfigField::secret("access_key"),
        ];
        let provider = DictionaryProvider::new()
            .with(&["destination"], "dataset_name", "analytics")
            .with(&["destination", "filesystem"], "bucket_url", "/tmp/bucket")
            .with(&["destination", "filesystem"], "access_key", "hunter2");

        let config = DestinationClientConfig::resolve("filesystem", FIELDS, &[&provider]).unwrap();
        assert_eq!(config.dataset_name, "analytics");
        assert_eq!(config.option("bucket_url"), Some("/tmp/bucket"));
        assert_eq!(config.secrets["access_key"].expose(), "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_dataset_for_schema() {
        let mut config = DestinationClientConfig::new("dummy", "analytics");
        assert_eq!(config.dataset_for_schema("events"), "analytics");
        config.default_schema_name = Some("events".to_string());
        assert_eq!(config.dataset_for_schema("events"), "analytics");
        assert_eq!(config.dataset_for_schema("crm"), "analytics_crm");
    }
}
