//! Job workers.
//!
//! One worker owns one job file from its first start until the file settles
//! in `completed_jobs` or `failed_jobs`, retries included. Nothing else
//! touches the file while the worker runs.

use loadflow_destination::{DestinationError, EmptyLoadJob, JobClient, LoadJob, TrackedJob};
use loadflow_ids::LoadId;
use loadflow_protocol::{LoadJobStatus, LoaderConfig, Schema};
use loadflow_storage::{LoadStorage, ParsedJobFileName};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::report::{FailureKind, JobOutcome};

/// How a worker gets its first job handle.
pub(crate) enum JobStart {
    /// File in `new_jobs`: start it
    New,
    /// File in `started_jobs` that the destination still knows
    Restored(Box<dyn LoadJob>),
    /// File in `started_jobs` that could not be re-attached. Recovery errors
    /// fail the file, transient ones retry it, anything else fails it as
    /// terminal.
    RestoreFailed(DestinationError),
}

/// Terminal state seen by the poll loop.
enum Settled {
    Completed,
    Failed(String),
    Retry(String),
}

#[derive(Clone)]
pub(crate) struct JobWorker {
    pub load_id: LoadId,
    pub storage: Arc<LoadStorage>,
    pub client: Arc<dyn JobClient>,
    pub schema: Arc<Schema>,
    pub config: LoaderConfig,
}

impl JobWorker {
    pub async fn run(self, file_name: String, start: JobStart) -> Result<JobOutcome> {
        let restored = !matches!(start, JobStart::New);
        let mut file_name = file_name;
        let mut attempts = 0u32;
        let mut next = start;

        loop {
            let settled = match std::mem::replace(&mut next, JobStart::New) {
                JobStart::Restored(job) => {
                    info!(load_id = %self.load_id, job = %file_name, "Restored in-flight job");
                    self.wait(TrackedJob::new(job)).await
                }
                JobStart::RestoreFailed(e) if e.is_recovery() => {
                    let exception = e.to_string();
                    error!(
                        load_id = %self.load_id,
                        job = %file_name,
                        "Cannot restore job: {}", exception
                    );
                    self.storage.fail_job(&self.load_id, &file_name, &exception)?;
                    return Ok(JobOutcome::failed(
                        file_name,
                        attempts,
                        restored,
                        exception,
                        FailureKind::Recovery,
                    ));
                }
                // Same classification as a start error
                JobStart::RestoreFailed(e) if e.is_transient() => Settled::Retry(e.to_string()),
                JobStart::RestoreFailed(e) => Settled::Failed(e.to_string()),
                JobStart::New => {
                    attempts += 1;
                    let job = self.start(&file_name)?;
                    self.wait(TrackedJob::new(job)).await
                }
            };

            match settled {
                Settled::Completed => {
                    self.storage.complete_job(&self.load_id, &file_name)?;
                    info!(load_id = %self.load_id, job = %file_name, attempts, "Job completed");
                    return Ok(JobOutcome::completed(file_name, attempts, restored));
                }
                Settled::Failed(exception) => {
                    self.storage.fail_job(&self.load_id, &file_name, &exception)?;
                    error!(load_id = %self.load_id, job = %file_name, "Job failed: {}", exception);
                    return Ok(JobOutcome::failed(
                        file_name,
                        attempts,
                        restored,
                        exception,
                        FailureKind::Terminal,
                    ));
                }
                Settled::Retry(exception) => {
                    let retry_count = ParsedJobFileName::parse(&file_name)?.retry_count;
                    if retry_count >= self.config.retry_limit {
                        let exception = format!(
                            "Retry limit of {} exceeded: {}",
                            self.config.retry_limit, exception
                        );
                        self.storage.fail_job(&self.load_id, &file_name, &exception)?;
                        error!(load_id = %self.load_id, job = %file_name, "{}", exception);
                        return Ok(JobOutcome::failed(
                            file_name,
                            attempts,
                            restored,
                            exception,
                            FailureKind::RetryLimitExceeded,
                        ));
                    }

                    let retried = self.storage.retry_job(&self.load_id, &file_name)?;
                    let backoff = self.config.retry_backoff(retry_count + 1);
                    warn!(
                        load_id = %self.load_id,
                        job = %file_name,
                        next = %retried,
                        backoff_ms = backoff.as_millis() as u64,
                        "Job will be retried: {}", exception
                    );
                    tokio::time::sleep(backoff).await;
                    file_name = retried;
                }
            }
        }
    }

    /// Move the file to `started_jobs` and hand it to the destination.
    ///
    /// Start errors become job outcomes: transient ones retry, the rest fail
    /// the file.
    fn start(&self, file_name: &str) -> Result<Box<dyn LoadJob>> {
        let parsed = ParsedJobFileName::parse(file_name)?;
        let path = self.storage.start_job(&self.load_id, file_name)?;

        let table = match self.schema.table(&parsed.table_name) {
            Some(table) => table,
            None => {
                return Ok(Box::new(EmptyLoadJob::failed(
                    file_name,
                    format!(
                        "Table {} is not in schema {}",
                        parsed.table_name, self.schema.name
                    ),
                )))
            }
        };

        debug!(
            load_id = %self.load_id,
            job = %file_name,
            retry = parsed.retry_count,
            "Starting job"
        );
        match self.client.start_file_load(table, &path) {
            Ok(job) => Ok(job),
            Err(e) if e.is_transient() => {
                Ok(Box::new(EmptyLoadJob::retry(file_name, e.to_string())))
            }
            Err(e) => Ok(Box::new(EmptyLoadJob::failed(file_name, e.to_string()))),
        }
    }

    /// Poll until the job is terminal, backing off from `poll_interval` to
    /// `max_poll_interval`.
    async fn wait(&self, mut job: TrackedJob) -> Settled {
        let mut interval = self.config.poll_interval;
        loop {
            match job.poll() {
                LoadJobStatus::Running => {
                    tokio::time::sleep(interval).await;
                    interval = interval
                        .saturating_mul(2)
                        .min(self.config.max_poll_interval);
                }
                LoadJobStatus::Completed => return Settled::Completed,
                LoadJobStatus::Failed => return Settled::Failed(diagnostic(&job)),
                LoadJobStatus::Retry => return Settled::Retry(diagnostic(&job)),
            }
        }
    }
}

fn diagnostic(job: &TrackedJob) -> String {
    job.exception()
        .unwrap_or("no diagnostic from destination")
        .to_string()
}
