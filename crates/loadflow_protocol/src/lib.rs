//! Shared vocabulary for the Loadflow stages.
//!
//! Extract, normalize and load only meet through the types defined here:
//! loader file formats, load job status, the opaque [`Schema`] value and the
//! statically declared stage configuration.

pub mod config;
pub mod defaults;
pub mod paths;
pub mod schema;
pub mod types;

pub use config::{
    ConfigError, ConfigField, ConfigProvider, DestinationClientConfig, DictionaryProvider,
    EnvironmentProvider, FieldKind, LoaderConfig, NormalizeConfig, SecretString,
};
pub use schema::{ColumnSchema, Schema, TableSchema};
pub use types::{LoadJobStatus, LoaderFileFormat};
