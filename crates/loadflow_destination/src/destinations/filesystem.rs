//! Local directory destination.
//!
//! Layout under `bucket_url`:
//!
//! ```text
//! <dataset>/<table>/<load_id>.<file_id>.<format>
//! <dataset>/_loads/<load_id>.json       one marker per completed package
//! <dataset>/_schemas/<schema>.<version>.json
//! ```
//!
//! Copies are synchronous and atomic (temp file + rename), so a job is
//! terminal as soon as `start_file_load` returns. The destination file name
//! drops the retry counter: a repeated attempt overwrites the same file.

use chrono::Utc;
use loadflow_ids::LoadId;
use loadflow_protocol::{
    ConfigError, ConfigField, DestinationClientConfig, LoaderFileFormat, Schema, TableSchema,
};
use loadflow_storage::{FileStorage, ParsedJobFileName};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::capabilities::DestinationCapabilities;
use crate::client::JobClient;
use crate::error::{DestinationError, Result};
use crate::job::{job_file_name, EmptyLoadJob, LoadJob};
use crate::reference::DestinationReference;

pub const FILESYSTEM_NAME: &str = "filesystem";
pub const LOADS_FOLDER: &str = "_loads";
pub const SCHEMAS_FOLDER: &str = "_schemas";

const FIELDS: &[ConfigField] = &[ConfigField::required_value("bucket_url")];

pub fn filesystem_capabilities() -> DestinationCapabilities {
    DestinationCapabilities {
        preferred_loader_file_format: LoaderFileFormat::Jsonl,
        supported_loader_file_formats: vec![LoaderFileFormat::Jsonl, LoaderFileFormat::Csv],
        max_identifier_length: 255,
        max_column_identifier_length: 255,
        max_query_length: usize::MAX,
        is_max_query_length_in_bytes: true,
        max_text_data_type_length: usize::MAX,
        is_max_text_data_type_length_in_bytes: true,
        supports_transactions: false,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemDestination;

impl FilesystemDestination {
    pub fn new() -> Self {
        Self
    }
}

impl DestinationReference for FilesystemDestination {
    fn name(&self) -> &str {
        FILESYSTEM_NAME
    }

    fn capabilities(&self) -> DestinationCapabilities {
        filesystem_capabilities()
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn client(
        &self,
        schema: Schema,
        config: DestinationClientConfig,
    ) -> Result<Arc<dyn JobClient>> {
        Ok(Arc::new(FilesystemClient::new(schema, config)?))
    }
}

#[derive(Serialize)]
struct LoadMarker<'a> {
    load_id: &'a str,
    schema_name: &'a str,
    schema_version: u64,
    completed_at: String,
}

pub struct FilesystemClient {
    schema: Schema,
    config: DestinationClientConfig,
    capabilities: DestinationCapabilities,
    dataset_path: PathBuf,
}

impl FilesystemClient {
    pub fn new(schema: Schema, config: DestinationClientConfig) -> Result<Self> {
        let bucket_url = config
            .option("bucket_url")
            .ok_or_else(|| ConfigError::invalid("bucket_url", "missing"))?;
        let bucket = bucket_url.strip_prefix("file://").unwrap_or(bucket_url);
        if bucket.is_empty() {
            return Err(ConfigError::invalid("bucket_url", "empty path").into());
        }
        let dataset = config.dataset_for_schema(&schema.name);
        let dataset_path = Path::new(bucket).join(dataset);
        Ok(Self {
            schema,
            config,
            capabilities: filesystem_capabilities(),
            dataset_path,
        })
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    fn dataset_storage(&self) -> Result<FileStorage> {
        Ok(FileStorage::new(&self.dataset_path, false)?)
    }

    /// `<table>/<load_id>.<file_id>.<format>` for a job file inside a package.
    fn destination_file(&self, file_path: &Path) -> Result<(String, PathBuf)> {
        let file_name = job_file_name(file_path)?;
        let job = ParsedJobFileName::parse(&file_name)?;
        // <package>/started_jobs/<file>
        let load_id = file_path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DestinationError::invalid_job_file(file_path, "not inside a load package")
            })?;
        let load_id = LoadId::parse(load_id)
            .map_err(|e| DestinationError::invalid_job_file(file_path, e.to_string()))?;
        let relative = PathBuf::from(&job.table_name).join(format!(
            "{}.{}.{}",
            load_id, job.file_id, job.file_format
        ));
        Ok((file_name, relative))
    }
}

impl JobClient for FilesystemClient {
    fn capabilities(&self) -> &DestinationCapabilities {
        &self.capabilities
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn config(&self) -> &DestinationClientConfig {
        &self.config
    }

    fn initialize_storage(&self, wipe_data: bool) -> Result<()> {
        if wipe_data && self.dataset_path.exists() {
            warn!(dataset = %self.dataset_path.display(), "Wiping filesystem dataset");
            fs::remove_dir_all(&self.dataset_path)
                .map_err(|e| DestinationError::io(&self.dataset_path, e))?;
        }
        let storage = FileStorage::new(&self.dataset_path, true)?;
        storage.create_folder(LOADS_FOLDER, true)?;
        storage.create_folder(SCHEMAS_FOLDER, true)?;
        Ok(())
    }

    fn update_storage_schema(&self) -> Result<()> {
        let storage = self.dataset_storage()?;
        let snapshot = PathBuf::from(SCHEMAS_FOLDER).join(format!(
            "{}.{}.json",
            self.schema.name, self.schema.version
        ));
        if storage.has_file(&snapshot) {
            return Ok(());
        }
        storage.save(&snapshot, self.schema.to_json()?)?;
        for table in self.schema.tables.keys() {
            storage.create_folder(table, true)?;
        }
        info!(
            schema = %self.schema.name,
            version = self.schema.version,
            "Stored schema snapshot"
        );
        Ok(())
    }

    fn start_file_load(&self, table: &TableSchema, file_path: &Path) -> Result<Box<dyn LoadJob>> {
        let (file_name, relative) = self.destination_file(file_path)?;
        let job = ParsedJobFileName::parse(&file_name)?;
        if job.table_name != table.name {
            return Err(DestinationError::invalid_job_file(
                file_path,
                format!("job belongs to table {}, not {}", job.table_name, table.name),
            ));
        }

        let storage = self.dataset_storage()?;
        let copied = fs::read(file_path)
            .map_err(|e| DestinationError::io(file_path, e))
            .and_then(|payload| {
                storage.create_folder(&table.name, true)?;
                Ok(storage.save(&relative, payload)?)
            });

        match copied {
            Ok(target) => {
                info!(job = %file_name, target = %target.display(), "Copied job file");
                Ok(Box::new(EmptyLoadJob::completed(file_name)))
            }
            Err(e) if e.is_transient() => {
                Ok(Box::new(EmptyLoadJob::retry(file_name, e.to_string())))
            }
            Err(e) => Ok(Box::new(EmptyLoadJob::failed(file_name, e.to_string()))),
        }
    }

    fn restore_file_load(&self, file_path: &Path) -> Result<Box<dyn LoadJob>> {
        let (file_name, relative) = self.destination_file(file_path)?;
        if self.dataset_path.join(&relative).is_file() {
            Ok(Box::new(EmptyLoadJob::completed(file_name)))
        } else {
            Err(DestinationError::restore_not_found(file_name))
        }
    }

    fn complete_load(&self, load_id: &LoadId) -> Result<()> {
        let marker = LoadMarker {
            load_id: load_id.as_str(),
            schema_name: &self.schema.name,
            schema_version: self.schema.version,
            completed_at: Utc::now().to_rfc3339(),
        };
        let storage = FileStorage::new(&self.dataset_path, true)?;
        storage.create_folder(LOADS_FOLDER, true)?;
        storage.save(
            PathBuf::from(LOADS_FOLDER).join(format!("{}.json", load_id)),
            serde_json::to_vec_pretty(&marker)?,
        )?;
        info!(load_id = %load_id, dataset = %self.dataset_path.display(), "Load marker written");
        Ok(())
    }
}
