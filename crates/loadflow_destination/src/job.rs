//! Load jobs: delivery of exactly one file.
//!
//! A job starts `Running` (or fails fast straight into `Failed`/`Retry`).
//! Only the destination decides when it leaves `Running`; every other state
//! is terminal and the orchestrator discards the job once it sees one.

use loadflow_protocol::LoadJobStatus;
use std::fmt;
use std::path::Path;
use tracing::warn;

use crate::error::{DestinationError, Result};

/// One delivery attempt, as seen by the orchestrator.
pub trait LoadJob: Send + Sync {
    /// Job file name. Doubles as the job id.
    fn file_name(&self) -> &str;

    /// Current status. May query the destination.
    fn status(&self) -> LoadJobStatus;

    /// Diagnostic for `Failed` and `Retry`.
    fn exception(&self) -> Option<String>;
}

impl fmt::Debug for dyn LoadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadJob")
            .field("file_name", &self.file_name())
            .finish()
    }
}

/// File name component of a job file path.
pub fn job_file_name(file_path: &Path) -> Result<String> {
    file_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DestinationError::invalid_job_file(file_path, "path has no file name"))
}

// ============================================================================
// Empty Load Job
// ============================================================================

/// A job whose status is known when it is built.
///
/// Used for fail-fast starts, synchronous destinations and restores of jobs
/// that already finished remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyLoadJob {
    file_name: String,
    status: LoadJobStatus,
    exception: Option<String>,
}

impl EmptyLoadJob {
    pub fn new(file_name: impl Into<String>, status: LoadJobStatus) -> Self {
        Self {
            file_name: file_name.into(),
            status,
            exception: None,
        }
    }

    pub fn completed(file_name: impl Into<String>) -> Self {
        Self::new(file_name, LoadJobStatus::Completed)
    }

    pub fn failed(file_name: impl Into<String>, exception: impl Into<String>) -> Self {
        Self::new(file_name, LoadJobStatus::Failed).with_exception(exception)
    }

    pub fn retry(file_name: impl Into<String>, exception: impl Into<String>) -> Self {
        Self::new(file_name, LoadJobStatus::Retry).with_exception(exception)
    }

    pub fn from_file_path(file_path: &Path, status: LoadJobStatus) -> Result<Self> {
        Ok(Self::new(job_file_name(file_path)?, status))
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }
}

impl LoadJob for EmptyLoadJob {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn status(&self) -> LoadJobStatus {
        self.status
    }

    fn exception(&self) -> Option<String> {
        self.exception.clone()
    }
}

// ============================================================================
// Terminal latch
// ============================================================================

/// Orchestrator-side wrapper that makes terminal states sticky.
///
/// The first terminal status observed is latched together with its
/// diagnostic; later polls return it without asking the destination again.
pub struct TrackedJob {
    job: Box<dyn LoadJob>,
    latched: Option<(LoadJobStatus, Option<String>)>,
}

impl TrackedJob {
    pub fn new(job: Box<dyn LoadJob>) -> Self {
        Self { job, latched: None }
    }

    pub fn file_name(&self) -> &str {
        self.job.file_name()
    }

    pub fn poll(&mut self) -> LoadJobStatus {
        if let Some((status, _)) = &self.latched {
            return *status;
        }
        let status = self.job.status();
        if status.is_terminal() {
            let mut exception = self.job.exception();
            if exception.is_none() && status != LoadJobStatus::Completed {
                warn!(
                    job = %self.job.file_name(),
                    status = status.as_str(),
                    "Destination reported a failure without a diagnostic"
                );
                exception = Some(format!("job ended in {} without a diagnostic", status));
            }
            self.latched = Some((status, exception));
        }
        status
    }

    /// Latched terminal status, if any.
    pub fn terminal_status(&self) -> Option<LoadJobStatus> {
        self.latched.as_ref().map(|(status, _)| *status)
    }

    pub fn exception(&self) -> Option<&str> {
        self.latched
            .as_ref()
            .and_then(|(_, exception)| exception.as_deref())
    }
}

impl fmt::Debug for TrackedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedJob")
            .field("file_name", &self.file_name())
            .field("latched", &self.latched)
            .finish()
    }
}
