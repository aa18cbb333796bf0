//! Error types for the staging storages.

use std::path::PathBuf;
use thiserror::Error;

/// Storage operation result type.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error (file system operations)
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored version differs from the expected one and no migration path exists
    #[error(
        "Storage at {root} has version {stored} but {expected} is required and no migration path exists"
    )]
    NoMigrationPath {
        root: PathBuf,
        stored: String,
        expected: String,
    },

    /// Stored version marker cannot be parsed
    #[error("Storage at {root} has an unreadable version marker '{marker}': {message}")]
    InvalidVersionMarker {
        root: PathBuf,
        marker: String,
        message: String,
    },

    /// Storage not initialized and this process is not its owner
    #[error("Storage at {0} is not initialized and this process is not its owner")]
    NotInitialized(PathBuf),

    /// Migration needed but this process is not the owner
    #[error("Storage at {root} needs migration from {stored} to {expected} but this process is not its owner")]
    MigrationRequiresOwner {
        root: PathBuf,
        stored: String,
        expected: String,
    },

    /// A registered migration step failed
    #[error("Migration of {root} from {from} to {to} failed: {message}")]
    MigrationFailed {
        root: PathBuf,
        from: String,
        to: String,
        message: String,
    },

    /// Storage is locked by another process
    #[error("Storage is locked by another process: {0}")]
    Locked(PathBuf),

    /// File name does not follow the naming convention
    #[error("Malformed file name '{name}': {reason}")]
    MalformedFileName { name: String, reason: String },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedFileName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Configuration errors make the storage unusable; retrying will not help.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StorageError::NoMigrationPath { .. }
                | StorageError::InvalidVersionMarker { .. }
                | StorageError::NotInitialized(_)
                | StorageError::MigrationRequiresOwner { .. }
                | StorageError::MigrationFailed { .. }
        )
    }
}
