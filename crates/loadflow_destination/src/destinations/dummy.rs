//! Scriptable destination that loads nothing.
//!
//! Remote jobs live in a [`DummyLedger`] that can be shared between clients
//! and runs, so a test can stop a load half way, start a new run on the same
//! ledger and watch the jobs get restored. Behaviour is chosen per table
//! through the client config:
//!
//! | option                   | effect                                           |
//! |--------------------------|--------------------------------------------------|
//! | `fail_tables`            | jobs end `Failed`                                |
//! | `fail_fast_tables`       | `start_file_load` returns a `Failed` job at once |
//! | `retry_tables`           | jobs end `Retry`                                 |
//! | `retries_before_success` | with `retry_tables`: succeed from this attempt on |
//! | `polls_until_done`       | `Running` polls before the outcome shows         |

use loadflow_ids::LoadId;
use loadflow_protocol::{
    ConfigError, ConfigField, DestinationClientConfig, LoadJobStatus, LoaderFileFormat, Schema,
    TableSchema,
};
use loadflow_storage::ParsedJobFileName;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::capabilities::DestinationCapabilities;
use crate::client::JobClient;
use crate::error::{DestinationError, Result};
use crate::job::{job_file_name, EmptyLoadJob, LoadJob};
use crate::reference::DestinationReference;

pub const DUMMY_NAME: &str = "dummy";

pub fn dummy_capabilities() -> DestinationCapabilities {
    DestinationCapabilities {
        preferred_loader_file_format: LoaderFileFormat::Jsonl,
        supported_loader_file_formats: vec![
            LoaderFileFormat::Jsonl,
            LoaderFileFormat::InsertValues,
        ],
        max_identifier_length: 127,
        max_column_identifier_length: 127,
        max_query_length: 512 * 1024,
        is_max_query_length_in_bytes: true,
        max_text_data_type_length: 65535,
        is_max_text_data_type_length_in_bytes: true,
        supports_transactions: false,
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone)]
struct RemoteJob {
    outcome: LoadJobStatus,
    polls_remaining: u32,
    exception: Option<String>,
}

#[derive(Debug, Default)]
struct LedgerState {
    remote_jobs: BTreeMap<String, RemoteJob>,
    submissions: Vec<String>,
    restores: Vec<String>,
    completed_loads: Vec<String>,
    initialized_datasets: BTreeSet<String>,
    schema_updates: usize,
    open_sessions: usize,
    close_calls: usize,
}

/// Shared record of everything the dummy destination was asked to do.
#[derive(Debug, Clone, Default)]
pub struct DummyLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl DummyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Job file names passed to `start_file_load`, in call order.
    pub fn submissions(&self) -> Vec<String> {
        self.state().submissions.clone()
    }

    /// Job file names passed to `restore_file_load`, in call order.
    pub fn restores(&self) -> Vec<String> {
        self.state().restores.clone()
    }

    pub fn completed_loads(&self) -> Vec<String> {
        self.state().completed_loads.clone()
    }

    pub fn is_initialized(&self, dataset: &str) -> bool {
        self.state().initialized_datasets.contains(dataset)
    }

    pub fn schema_updates(&self) -> usize {
        self.state().schema_updates
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    /// Drop the remote state of a job, as if the destination lost it.
    pub fn forget(&self, file_name: &str) -> bool {
        self.state().remote_jobs.remove(file_name).is_some()
    }
}

// ============================================================================
// Behaviour
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyBehavior {
    pub fail_tables: BTreeSet<String>,
    pub fail_fast_tables: BTreeSet<String>,
    pub retry_tables: BTreeSet<String>,
    /// `None`: retry tables never succeed.
    pub retries_before_success: Option<u32>,
    pub polls_until_done: u32,
}

impl DummyBehavior {
    pub const FIELDS: &'static [ConfigField] = &[
        ConfigField::value("fail_tables"),
        ConfigField::value("fail_fast_tables"),
        ConfigField::value("retry_tables"),
        ConfigField::value("retries_before_success"),
        ConfigField::value("polls_until_done"),
    ];

    pub fn from_config(config: &DestinationClientConfig) -> std::result::Result<Self, ConfigError> {
        let number = |field: &str| -> std::result::Result<Option<u32>, ConfigError> {
            config
                .option(field)
                .map(|raw| {
                    raw.trim()
                        .parse::<u32>()
                        .map_err(|e| ConfigError::invalid(field, e.to_string()))
                })
                .transpose()
        };
        Ok(Self {
            fail_tables: table_set(config.option("fail_tables")),
            fail_fast_tables: table_set(config.option("fail_fast_tables")),
            retry_tables: table_set(config.option("retry_tables")),
            retries_before_success: number("retries_before_success")?,
            polls_until_done: number("polls_until_done")?.unwrap_or(0),
        })
    }

    fn outcome(&self, job: &ParsedJobFileName) -> (LoadJobStatus, Option<String>) {
        if self.fail_tables.contains(&job.table_name) {
            return (
                LoadJobStatus::Failed,
                Some(format!("table {} is configured to fail", job.table_name)),
            );
        }
        if self.retry_tables.contains(&job.table_name) {
            let succeeds = self
                .retries_before_success
                .map_or(false, |n| job.retry_count >= n);
            if !succeeds {
                return (
                    LoadJobStatus::Retry,
                    Some(format!(
                        "table {} is configured to retry (attempt {})",
                        job.table_name, job.retry_count
                    )),
                );
            }
        }
        (LoadJobStatus::Completed, None)
    }
}

fn table_set(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// ============================================================================
// Reference
// ============================================================================

#[derive(Debug, Clone)]
pub struct DummyDestination {
    capabilities: DestinationCapabilities,
    ledger: DummyLedger,
}

impl Default for DummyDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDestination {
    pub fn new() -> Self {
        Self {
            capabilities: dummy_capabilities(),
            ledger: DummyLedger::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: DummyLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_capabilities(mut self, capabilities: DestinationCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn ledger(&self) -> &DummyLedger {
        &self.ledger
    }
}

impl DestinationReference for DummyDestination {
    fn name(&self) -> &str {
        DUMMY_NAME
    }

    fn capabilities(&self) -> DestinationCapabilities {
        self.capabilities.clone()
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        DummyBehavior::FIELDS
    }

    fn client(
        &self,
        schema: Schema,
        config: DestinationClientConfig,
    ) -> Result<Arc<dyn JobClient>> {
        let behavior = DummyBehavior::from_config(&config)?;
        Ok(Arc::new(
            DummyClient::new(schema, config, self.ledger.clone())
                .with_capabilities(self.capabilities.clone())
                .with_behavior(behavior),
        ))
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct DummyClient {
    schema: Schema,
    config: DestinationClientConfig,
    capabilities: DestinationCapabilities,
    behavior: DummyBehavior,
    ledger: DummyLedger,
    is_open: AtomicBool,
}

impl DummyClient {
    pub fn new(schema: Schema, config: DestinationClientConfig, ledger: DummyLedger) -> Self {
        Self {
            schema,
            config,
            capabilities: dummy_capabilities(),
            behavior: DummyBehavior::default(),
            ledger,
            is_open: AtomicBool::new(false),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DestinationCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_behavior(mut self, behavior: DummyBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DestinationError::NotOpen(DUMMY_NAME.to_string()))
        }
    }

    fn dataset(&self) -> String {
        self.config.dataset_for_schema(&self.schema.name)
    }
}

impl JobClient for DummyClient {
    fn capabilities(&self) -> &DestinationCapabilities {
        &self.capabilities
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn config(&self) -> &DestinationClientConfig {
        &self.config
    }

    fn open(&self) -> Result<()> {
        if !self.is_open.swap(true, Ordering::SeqCst) {
            self.ledger.state().open_sessions += 1;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.ledger.state();
        state.close_calls += 1;
        if self.is_open.swap(false, Ordering::SeqCst) {
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        Ok(())
    }

    fn initialize_storage(&self, wipe_data: bool) -> Result<()> {
        self.ensure_open()?;
        let dataset = self.dataset();
        let mut state = self.ledger.state();
        if wipe_data {
            state.initialized_datasets.remove(&dataset);
            state.remote_jobs.clear();
        }
        state.initialized_datasets.insert(dataset);
        Ok(())
    }

    fn update_storage_schema(&self) -> Result<()> {
        self.ensure_open()?;
        self.ledger.state().schema_updates += 1;
        debug!(schema = %self.schema.name, version = self.schema.version, "Dummy schema update");
        Ok(())
    }

    fn start_file_load(&self, table: &TableSchema, file_path: &Path) -> Result<Box<dyn LoadJob>> {
        self.ensure_open()?;
        let file_name = job_file_name(file_path)?;
        if !file_path.is_file() {
            return Err(DestinationError::invalid_job_file(file_path, "file does not exist"));
        }
        let parsed = ParsedJobFileName::parse(&file_name)?;

        if self.behavior.fail_fast_tables.contains(&table.name) {
            return Ok(Box::new(EmptyLoadJob::failed(
                file_name,
                format!("table {} is configured to fail before loading", table.name),
            )));
        }

        let (outcome, exception) = self.behavior.outcome(&parsed);
        let mut state = self.ledger.state();
        state.submissions.push(file_name.clone());
        state.remote_jobs.insert(
            file_name.clone(),
            RemoteJob {
                outcome,
                polls_remaining: self.behavior.polls_until_done,
                exception,
            },
        );
        info!(job = %file_name, outcome = outcome.as_str(), "Dummy load started");

        Ok(Box::new(DummyLoadJob {
            file_name,
            ledger: self.ledger.clone(),
        }))
    }

    fn restore_file_load(&self, file_path: &Path) -> Result<Box<dyn LoadJob>> {
        self.ensure_open()?;
        let file_name = job_file_name(file_path)?;
        let mut state = self.ledger.state();
        if !state.remote_jobs.contains_key(&file_name) {
            return Err(DestinationError::restore_not_found(file_name));
        }
        state.restores.push(file_name.clone());
        Ok(Box::new(DummyLoadJob {
            file_name,
            ledger: self.ledger.clone(),
        }))
    }

    fn complete_load(&self, load_id: &LoadId) -> Result<()> {
        self.ensure_open()?;
        self.ledger
            .state()
            .completed_loads
            .push(load_id.to_string());
        Ok(())
    }
}

struct DummyLoadJob {
    file_name: String,
    ledger: DummyLedger,
}

impl LoadJob for DummyLoadJob {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn status(&self) -> LoadJobStatus {
        let mut state = self.ledger.state();
        match state.remote_jobs.get_mut(&self.file_name) {
            Some(job) if job.polls_remaining > 0 => {
                job.polls_remaining -= 1;
                LoadJobStatus::Running
            }
            Some(job) => job.outcome,
            None => LoadJobStatus::Failed,
        }
    }

    fn exception(&self) -> Option<String> {
        match self.ledger.state().remote_jobs.get(&self.file_name) {
            Some(job) => job.exception.clone(),
            None => Some(format!("remote job for {} was lost", self.file_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn job_file(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "{}\n").unwrap();
        path
    }

    fn open_client(config: DestinationClientConfig, ledger: &DummyLedger) -> Arc<dyn JobClient> {
        let client = DummyDestination::new()
            .with_ledger(ledger.clone())
            .client(Schema::new("events"), config)
            .unwrap();
        client.open().unwrap();
        client
    }

    #[test]
    fn test_completes_after_polls() {
        let dir = TempDir::new().unwrap();
        let ledger = DummyLedger::new();
        let config =
            DestinationClientConfig::new("dummy", "ds").with_option("polls_until_done", "2");
        let client = open_client(config, &ledger);

        let job = client
            .start_file_load(&TableSchema::new("users"), &job_file(&dir, "users.f1.0.jsonl"))
            .unwrap();
        assert_eq!(job.status(), LoadJobStatus::Running);
        assert_eq!(job.status(), LoadJobStatus::Running);
        assert_eq!(job.status(), LoadJobStatus::Completed);
        assert_eq!(job.status(), LoadJobStatus::Completed);
        assert_eq!(ledger.submissions(), vec!["users.f1.0.jsonl"]);
    }

    #[test]
    fn test_retry_until_attempt() {
        let dir = TempDir::new().unwrap();
        let ledger = DummyLedger::new();
        let config = DestinationClientConfig::new("dummy", "ds")
            .with_option("retry_tables", "users")
            .with_option("retries_before_success", "1");
        let client = open_client(config, &ledger);
        let table = TableSchema::new("users");

        let first = client
            .start_file_load(&table, &job_file(&dir, "users.f1.0.jsonl"))
            .unwrap();
        assert_eq!(first.status(), LoadJobStatus::Retry);
        assert!(first.exception().unwrap().contains("retry"));

        let second = client
            .start_file_load(&table, &job_file(&dir, "users.f1.1.jsonl"))
            .unwrap();
        assert_eq!(second.status(), LoadJobStatus::Completed);
    }

    #[test]
    fn test_fail_fast_is_not_submitted() {
        let dir = TempDir::new().unwrap();
        let ledger = DummyLedger::new();
        let config =
            DestinationClientConfig::new("dummy", "ds").with_option("fail_fast_tables", "users");
        let client = open_client(config, &ledger);

        let job = client
            .start_file_load(&TableSchema::new("users"), &job_file(&dir, "users.f1.0.jsonl"))
            .unwrap();
        assert_eq!(job.status(), LoadJobStatus::Failed);
        assert!(job.exception().is_some());
        assert!(ledger.submissions().is_empty());
    }

    #[test]
    fn test_restore_reattaches_without_resubmitting() {
        let dir = TempDir::new().unwrap();
        let ledger = DummyLedger::new();
        let path = job_file(&dir, "users.f1.0.jsonl");
        {
            let client = open_client(DestinationClientConfig::new("dummy", "ds"), &ledger);
            client.start_file_load(&TableSchema::new("users"), &path).unwrap();
        }

        let client = open_client(DestinationClientConfig::new("dummy", "ds"), &ledger);
        let job = client.restore_file_load(&path).unwrap();
        assert_eq!(job.status(), LoadJobStatus::Completed);
        assert_eq!(ledger.submissions().len(), 1);
        assert_eq!(ledger.restores(), vec!["users.f1.0.jsonl"]);
    }

    #[test]
    fn test_restore_unknown_file() {
        let dir = TempDir::new().unwrap();
        let ledger = DummyLedger::new();
        let client = open_client(DestinationClientConfig::new("dummy", "ds"), &ledger);
        let err = client
            .restore_file_load(&job_file(&dir, "users.f9.0.jsonl"))
            .err()
            .unwrap();
        assert!(err.is_recovery());
    }

    #[test]
    fn test_calls_require_open_session() {
        let client = DummyClient::new(
            Schema::new("events"),
            DestinationClientConfig::new("dummy", "ds"),
            DummyLedger::new(),
        );
        assert!(matches!(
            client.initialize_storage(false),
            Err(DestinationError::NotOpen(_))
        ));
    }

    #[test]
    fn test_invalid_knob() {
        let config =
            DestinationClientConfig::new("dummy", "ds").with_option("polls_until_done", "many");
        let err = DummyDestination::new()
            .client(Schema::new("events"), config)
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
