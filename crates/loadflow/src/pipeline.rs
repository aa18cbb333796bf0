//! Pipeline: one working directory, one destination, three stages.
//!
//! ```text
//! <working_dir>/
//! ├── normalize/extracted/   extract -> normalize handoff
//! ├── load/                  load packages (new/, normalized/, loaded/)
//! └── schemas/               latest schema per name
//! ```

use anyhow::{Context, Result};
use loadflow_destination::{DestinationReference, DestinationRegistry};
use loadflow_ids::LoadId;
use loadflow_load::{Load, LoadReport};
use loadflow_normalize::{Normalize, NormalizeReport};
use loadflow_protocol::paths::{load_volume, normalize_volume};
use loadflow_protocol::{
    ConfigProvider, DestinationClientConfig, LoaderConfig, LoaderFileFormat, NormalizeConfig,
    Schema,
};
use loadflow_storage::{FileStorage, LoadStorage, NormalizeStorage};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PipelineConfig;

pub const SCHEMAS_FOLDER: &str = "schemas";
const SCHEMA_FILE_SUFFIX: &str = ".schema.json";

#[derive(Debug, Clone)]
pub struct RunReport {
    pub normalize: NormalizeReport,
    pub load: LoadReport,
}

pub struct Pipeline {
    config: PipelineConfig,
    working_dir: PathBuf,
    destination: Arc<dyn DestinationReference>,
    schema_storage: FileStorage,
    schemas: BTreeMap<String, Schema>,
    normalize: Normalize,
    load: Load,
}

impl Pipeline {
    /// Resolve the destination in `registry` and every stage config from
    /// `providers`.
    pub fn new(
        config: PipelineConfig,
        registry: &DestinationRegistry,
        providers: &[&dyn ConfigProvider],
    ) -> Result<Self> {
        config.validate()?;
        let destination = registry
            .resolve(&config.destination)
            .context("Failed to resolve destination")?;
        let client_config = DestinationClientConfig::resolve(
            destination.name(),
            destination.config_fields(),
            providers,
        )
        .with_context(|| format!("Invalid configuration for destination {}", destination.name()))?;
        let normalize_config =
            NormalizeConfig::resolve(providers).context("Invalid normalize configuration")?;
        let loader_config = LoaderConfig::resolve(providers).context("Invalid load configuration")?;

        Self::from_parts(
            config,
            destination,
            client_config,
            &normalize_config,
            loader_config,
        )
    }

    /// Build from already resolved parts.
    pub fn from_parts(
        config: PipelineConfig,
        destination: Arc<dyn DestinationReference>,
        client_config: DestinationClientConfig,
        normalize_config: &NormalizeConfig,
        loader_config: LoaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let working_dir = config.working_dir();
        let load_volume = load_volume(&working_dir);

        let normalize_storage = NormalizeStorage::new(normalize_volume(&working_dir), true)
            .context("Failed to open normalize storage")?;
        let packages_out = LoadStorage::new(load_volume.clone(), true)
            .context("Failed to open load storage")?;
        // Initialized just above; the load stage only reads and moves jobs
        let packages_in = LoadStorage::new(load_volume, false)?;

        let normalize = Normalize::new(
            normalize_storage,
            packages_out,
            normalize_config,
            destination.capabilities(),
        )
        .with_context(|| format!("Cannot normalize for destination {}", destination.name()))?;
        let load = Load::new(
            packages_in,
            Arc::clone(&destination),
            client_config,
            loader_config,
        )?;

        let schema_storage = FileStorage::new(working_dir.join(SCHEMAS_FOLDER), true)?;
        let schemas = read_schemas(&schema_storage)?;

        info!(
            pipeline = %config.pipeline_name,
            destination = destination.name(),
            format = %normalize.file_format(),
            schemas = schemas.len(),
            working_dir = %working_dir.display(),
            "Pipeline ready"
        );

        Ok(Self {
            config,
            working_dir,
            destination,
            schema_storage,
            schemas,
            normalize,
            load,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn destination_name(&self) -> &str {
        self.destination.name()
    }

    /// Format negotiated with the destination.
    pub fn file_format(&self) -> LoaderFileFormat {
        self.normalize.file_format()
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// Packages normalized but not loaded yet.
    pub fn pending_packages(&self) -> Result<Vec<LoadId>> {
        Ok(self.load.load_storage().list_normalized_packages()?)
    }

    /// Stage one batch of records for `schema_name.table_name`.
    pub fn extract(
        &self,
        schema_name: &str,
        table_name: &str,
        records: &[Value],
    ) -> Result<String> {
        let file_name = self
            .normalize
            .normalize_storage()
            .save_extracted_file(schema_name, table_name, records)
            .with_context(|| {
                format!("Failed to stage records for {}.{}", schema_name, table_name)
            })?;
        Ok(file_name)
    }

    /// Turn staged files into load packages and persist changed schemas.
    pub fn normalize(&mut self) -> Result<NormalizeReport> {
        let versions: BTreeMap<String, u64> = self
            .schemas
            .iter()
            .map(|(name, schema)| (name.clone(), schema.version))
            .collect();

        let report = self.normalize.run(&mut self.schemas)?;

        for (name, schema) in &self.schemas {
            if versions.get(name) != Some(&schema.version) {
                self.save_schema(schema)?;
            }
        }
        Ok(report)
    }

    /// Load every pending package.
    pub async fn load(&self) -> Result<LoadReport> {
        Ok(self.load.run().await?)
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        let normalize = self.normalize()?;
        let load = self.load().await?;
        info!(
            pipeline = %self.config.pipeline_name,
            packages = load.packages.len(),
            jobs = load.job_count(),
            "Pipeline run finished"
        );
        Ok(RunReport { normalize, load })
    }

    fn save_schema(&self, schema: &Schema) -> Result<()> {
        let file_name = format!("{}{}", schema.name, SCHEMA_FILE_SUFFIX);
        self.schema_storage.save(&file_name, schema.to_json()?)?;
        debug!(schema = %schema.name, version = schema.version, "Saved schema");
        Ok(())
    }
}

fn read_schemas(storage: &FileStorage) -> Result<BTreeMap<String, Schema>> {
    let mut schemas = BTreeMap::new();
    for file_name in storage.list_folder_files("")? {
        if !file_name.ends_with(SCHEMA_FILE_SUFFIX) {
            continue;
        }
        let json = storage.load(&file_name)?;
        let schema = Schema::from_json(&json)
            .with_context(|| format!("Corrupt schema file {}", file_name))?;
        schemas.insert(schema.name.clone(), schema);
    }
    Ok(schemas)
}
