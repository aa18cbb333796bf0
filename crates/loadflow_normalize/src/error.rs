//! Normalize stage errors.

use loadflow_destination::{DestinationError, LimitError};
use loadflow_protocol::ConfigError;
use loadflow_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NormalizeError>;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A generated identifier, statement or value does not fit the destination
    #[error("{file}: {source}")]
    Limit {
        file: String,
        #[source]
        source: LimitError,
    },

    /// A record of an extracted file is not a JSON object
    #[error("{file} record {record}: {message}")]
    InvalidRecord {
        file: String,
        record: usize,
        message: String,
    },
}

impl NormalizeError {
    pub fn limit(file: impl Into<String>, source: LimitError) -> Self {
        Self::Limit {
            file: file.into(),
            source,
        }
    }

    /// Errors that stop the stage, as opposed to failing a single file.
    pub fn is_configuration(&self) -> bool {
        match self {
            NormalizeError::Config(_) => true,
            NormalizeError::Destination(e) => e.is_configuration(),
            NormalizeError::Storage(e) => e.is_configuration(),
            _ => false,
        }
    }
}
