//! Load stage errors.
//!
//! A job that ends `Failed` is recorded in the package, not returned as an
//! error. Errors here stop a package: broken storage, a destination that
//! cannot be set up, or a package that finished with failed jobs.

use loadflow_destination::DestinationError;
use loadflow_ids::LoadId;
use loadflow_protocol::ConfigError;
use loadflow_storage::StorageError;
use thiserror::Error;

use crate::report::FailedJob;

pub type Result<T> = std::result::Result<T, LoadError>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every job settled but at least one failed. The package stays in
    /// `normalized/`.
    #[error(
        "Load package {load_id} has {} failed job(s){}",
        .failed.len(),
        first_failure(.failed)
    )]
    PackageFailed {
        load_id: LoadId,
        failed: Vec<FailedJob>,
    },

    /// `complete_load` was requested while jobs were not all completed
    #[error("Load package {load_id} is not complete: {}", .pending.join(", "))]
    IncompleteLoad { load_id: LoadId, pending: Vec<String> },

    /// A job worker panicked or was cancelled
    #[error("Job worker did not finish: {0}")]
    Worker(String),
}

fn first_failure(failed: &[FailedJob]) -> String {
    match failed.first() {
        Some(job) => format!(", first: {} ({})", job.file_name, job.exception),
        None => String::new(),
    }
}

impl LoadError {
    /// Fixing this needs a config change, not another run.
    pub fn is_configuration(&self) -> bool {
        match self {
            LoadError::Config(_) => true,
            LoadError::Destination(e) => e.is_configuration(),
            LoadError::Storage(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// Another run may get further without any change.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Destination(e) => e.is_transient(),
            LoadError::Storage(StorageError::Locked(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FailureKind;

    #[test]
    fn test_package_failed_message() {
        let load_id = LoadId::parse("0000000000000042").unwrap();
        let err = LoadError::PackageFailed {
            load_id,
            failed: vec![FailedJob {
                file_name: "users.f1.0.jsonl".into(),
                exception: "boom".into(),
                kind: FailureKind::Terminal,
            }],
        };
        assert_eq!(
            err.to_string(),
            "Load package 0000000000000042 has 1 failed job(s), first: users.f1.0.jsonl (boom)"
        );
        assert!(!err.is_configuration());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classification() {
        let err: LoadError = ConfigError::invalid("workers", "must be at least 1").into();
        assert!(err.is_configuration());

        let err: LoadError = DestinationError::Transient("timeout".into()).into();
        assert!(err.is_transient());
    }
}
