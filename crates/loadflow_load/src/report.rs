//! What a load run did, per package and per job.

use loadflow_ids::LoadId;
use loadflow_protocol::LoadJobStatus;
use std::fmt;

/// Why a job ended up in `failed_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The destination reported `Failed`, or refused to start the file
    Terminal,
    /// The job kept asking for a retry
    RetryLimitExceeded,
    /// The job was in flight when a run stopped and could not be restored
    Recovery,
    /// Failed in an earlier run of the same package
    PreviousRun,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Terminal => "terminal",
            FailureKind::RetryLimitExceeded => "retry_limit_exceeded",
            FailureKind::Recovery => "recovery",
            FailureKind::PreviousRun => "previous_run",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub file_name: String,
    pub exception: String,
    pub kind: FailureKind,
}

/// Final state of one job file in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Name the file was settled under (carries the last retry count).
    pub file_name: String,
    /// `Completed` or `Failed`.
    pub status: LoadJobStatus,
    /// Submissions made in this run. Zero for a restored job that needed none.
    pub attempts: u32,
    /// Picked up from `started_jobs` instead of being started fresh.
    pub restored: bool,
    pub failure: Option<FailedJob>,
}

impl JobOutcome {
    pub(crate) fn completed(file_name: String, attempts: u32, restored: bool) -> Self {
        Self {
            file_name,
            status: LoadJobStatus::Completed,
            attempts,
            restored,
            failure: None,
        }
    }

    pub(crate) fn failed(
        file_name: String,
        attempts: u32,
        restored: bool,
        exception: String,
        kind: FailureKind,
    ) -> Self {
        Self {
            failure: Some(FailedJob {
                file_name: file_name.clone(),
                exception,
                kind,
            }),
            file_name,
            status: LoadJobStatus::Failed,
            attempts,
            restored,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == LoadJobStatus::Completed
    }
}

#[derive(Debug, Clone)]
pub struct PackageReport {
    pub load_id: LoadId,
    pub schema_name: String,
    /// Sorted by file name.
    pub jobs: Vec<JobOutcome>,
}

impl PackageReport {
    pub fn restored_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.restored).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Packages moved to `loaded/`, oldest first.
    pub packages: Vec<PackageReport>,
}

impl LoadReport {
    pub fn job_count(&self) -> usize {
        self.packages.iter().map(|p| p.jobs.len()).sum()
    }
}
