//! Load stage.
//!
//! Packages are loaded one at a time, oldest first. Inside a package:
//!
//! 1. open a client session, initialize storage, update the schema
//! 2. restore every job left in `started_jobs` by an earlier run
//! 3. start the jobs in `new_jobs`, at most `workers` in flight
//! 4. once all jobs settled without failures, `complete_load` and move the
//!    package to `loaded/`
//!
//! A package with a failed job stays in `normalized/` and stops the run.

use loadflow_destination::{DestinationReference, JobClient, JobClientSession};
use loadflow_ids::LoadId;
use loadflow_protocol::{DestinationClientConfig, LoaderConfig, Schema};
use loadflow_storage::{JobFolder, LoadStorage};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{LoadError, Result};
use crate::report::{FailedJob, FailureKind, JobOutcome, LoadReport, PackageReport};
use crate::worker::{JobStart, JobWorker};

type WorkerResult = (String, Result<JobOutcome>);

pub struct Load {
    storage: Arc<LoadStorage>,
    destination: Arc<dyn DestinationReference>,
    client_config: DestinationClientConfig,
    config: LoaderConfig,
}

impl Load {
    pub fn new(
        storage: LoadStorage,
        destination: Arc<dyn DestinationReference>,
        client_config: DestinationClientConfig,
        config: LoaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        destination.capabilities().validate()?;
        Ok(Self {
            storage: Arc::new(storage),
            destination,
            client_config,
            config,
        })
    }

    pub fn load_storage(&self) -> &LoadStorage {
        &self.storage
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load every normalized package, oldest first.
    ///
    /// Stops at the first package that fails. That package stays in
    /// `normalized/` and is the first one tried by the next run, so newer
    /// packages wait until its failed jobs are dealt with.
    pub async fn run(&self) -> Result<LoadReport> {
        let packages = self.storage.list_normalized_packages()?;
        if packages.is_empty() {
            debug!("No load packages waiting");
        }

        let mut report = LoadReport::default();
        for load_id in packages {
            report.packages.push(self.load_package(&load_id).await?);
        }
        Ok(report)
    }

    pub async fn load_package(&self, load_id: &LoadId) -> Result<PackageReport> {
        let schema = self.storage.load_package_schema(load_id)?;
        let counts = self.storage.job_counts(load_id)?;
        info!(
            load_id = %load_id,
            schema = %schema.name,
            destination = self.destination.name(),
            new = counts.new,
            started = counts.started,
            "Loading package"
        );

        let client = self
            .destination
            .client(schema.clone(), self.client_config.clone())?;
        let session = JobClientSession::open(client)?;
        session.initialize_storage(false)?;
        session.update_storage_schema()?;

        let mut jobs = self
            .run_jobs(load_id, Arc::new(schema.clone()), session.client())
            .await?;
        jobs.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        let failed = self.collect_failures(load_id, &jobs)?;
        if !failed.is_empty() {
            if let Err(e) = session.finish() {
                warn!(load_id = %load_id, "Failed to close job client: {}", e);
            }
            error!(load_id = %load_id, failed = failed.len(), "Load package has failed jobs");
            return Err(LoadError::PackageFailed {
                load_id: load_id.clone(),
                failed,
            });
        }

        self.ensure_complete(load_id, &jobs)?;
        session.complete_load(load_id)?;
        self.storage.complete_load_package(load_id)?;
        session.finish()?;

        info!(load_id = %load_id, jobs = jobs.len(), "Load package loaded");
        Ok(PackageReport {
            load_id: load_id.clone(),
            schema_name: schema.name,
            jobs,
        })
    }

    async fn run_jobs(
        &self,
        load_id: &LoadId,
        schema: Arc<Schema>,
        client: Arc<dyn JobClient>,
    ) -> Result<Vec<JobOutcome>> {
        let worker = JobWorker {
            load_id: load_id.clone(),
            storage: Arc::clone(&self.storage),
            client: Arc::clone(&client),
            schema,
            config: self.config.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks: JoinSet<WorkerResult> = JoinSet::new();

        // All restores return before the first new start
        for file_name in self.storage.list_started_jobs(load_id)? {
            let path = self
                .storage
                .job_file_path(load_id, JobFolder::Started, &file_name);
            let start = match client.restore_file_load(&path) {
                Ok(job) => JobStart::Restored(job),
                Err(e) => JobStart::RestoreFailed(e),
            };
            spawn_worker(&mut tasks, &semaphore, worker.clone(), file_name, start);
        }
        for file_name in self.storage.list_new_jobs(load_id)? {
            spawn_worker(&mut tasks, &semaphore, worker.clone(), file_name, JobStart::New);
        }

        // Drain every worker even after an error so no file is left mid-move
        let mut outcomes = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => outcomes.push(outcome),
                Ok((file_name, Err(e))) => {
                    error!(load_id = %load_id, job = %file_name, "Job worker error: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(load_id = %load_id, "Job worker did not finish: {}", e);
                    first_error.get_or_insert(LoadError::Worker(e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Failures of this run plus files that failed in earlier runs.
    fn collect_failures(&self, load_id: &LoadId, jobs: &[JobOutcome]) -> Result<Vec<FailedJob>> {
        let mut failed: Vec<FailedJob> = jobs.iter().filter_map(|j| j.failure.clone()).collect();
        for file_name in self.storage.list_failed_jobs(load_id)? {
            if failed.iter().any(|f| f.file_name == file_name) {
                continue;
            }
            let exception = self
                .storage
                .job_exception(load_id, &file_name)?
                .unwrap_or_else(|| "no exception recorded".to_string());
            failed.push(FailedJob {
                file_name,
                exception,
                kind: FailureKind::PreviousRun,
            });
        }
        Ok(failed)
    }

    /// Guard in front of `complete_load`: every job of the package completed.
    fn ensure_complete(&self, load_id: &LoadId, jobs: &[JobOutcome]) -> Result<()> {
        let mut pending: Vec<String> = jobs
            .iter()
            .filter(|j| !j.is_completed())
            .map(|j| j.file_name.clone())
            .collect();
        for folder in [JobFolder::New, JobFolder::Started, JobFolder::Failed] {
            pending.extend(self.storage.list_jobs(load_id, folder)?);
        }

        if pending.is_empty() {
            Ok(())
        } else {
            Err(LoadError::IncompleteLoad {
                load_id: load_id.clone(),
                pending,
            })
        }
    }
}

fn spawn_worker(
    tasks: &mut JoinSet<WorkerResult>,
    semaphore: &Arc<Semaphore>,
    worker: JobWorker,
    file_name: String,
    start: JobStart,
) {
    let semaphore = Arc::clone(semaphore);
    tasks.spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return (
                    file_name,
                    Err(LoadError::Worker("worker pool closed".to_string())),
                )
            }
        };
        let result = worker.run(file_name.clone(), start).await;
        (file_name, result)
    });
}
