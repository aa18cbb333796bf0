//! Destination errors.
//!
//! Job outcomes are not errors: a file that cannot be delivered surfaces as a
//! job in `Failed` or `Retry`. The variants here are for calls that cannot
//! produce a job at all, or that configure the destination.

use loadflow_protocol::{ConfigError, LoaderFileFormat};
use loadflow_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

use crate::capabilities::LimitError;

pub type Result<T> = std::result::Result<T, DestinationError>;

#[derive(Debug, Error)]
pub enum DestinationError {
    /// No destination registered under this name
    #[error("Unknown destination '{name}' (known: {})", .known.join(", "))]
    UnknownDestination { name: String, known: Vec<String> },

    /// Producible and supported formats do not overlap
    #[error(
        "No viable loader file format: can produce [{}], destination supports [{}]",
        format_list(.producible),
        format_list(.supported)
    )]
    NoViableFormat {
        producible: Vec<LoaderFileFormat>,
        supported: Vec<LoaderFileFormat>,
    },

    #[error("Invalid destination capabilities: {0}")]
    InvalidCapabilities(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Limit(#[from] LimitError),

    /// Recovery found no remote state for a file
    #[error("Cannot restore load of '{file_name}': no matching job at the destination")]
    RestoreNotFound { file_name: String },

    /// The file is not a job file
    #[error("Invalid job file {path}: {reason}")]
    InvalidJobFile { path: PathBuf, reason: String },

    /// Call on a client whose session is not open
    #[error("Job client for '{0}' is not open")]
    NotOpen(String),

    /// Retryable backend failure
    #[error("Transient destination error: {0}")]
    Transient(String),

    /// Permanent backend failure
    #[error("Terminal destination error: {0}")]
    Terminal(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_list(formats: &[LoaderFileFormat]) -> String {
    formats
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl DestinationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_capabilities(msg: impl Into<String>) -> Self {
        Self::InvalidCapabilities(msg.into())
    }

    pub fn invalid_job_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidJobFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn restore_not_found(file_name: impl Into<String>) -> Self {
        Self::RestoreNotFound {
            file_name: file_name.into(),
        }
    }

    /// Worth retrying the same call later.
    pub fn is_transient(&self) -> bool {
        match self {
            DestinationError::Transient(_) => true,
            DestinationError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Fatal for the stage being set up; never retried.
    pub fn is_configuration(&self) -> bool {
        match self {
            DestinationError::UnknownDestination { .. }
            | DestinationError::NoViableFormat { .. }
            | DestinationError::InvalidCapabilities(_)
            | DestinationError::Config(_) => true,
            DestinationError::Storage(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// Raised by `restore_file_load`; distinct from fresh-start failures.
    pub fn is_recovery(&self) -> bool {
        matches!(self, DestinationError::RestoreNotFound { .. })
    }
}
