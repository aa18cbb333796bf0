//! Load packages: the handoff from normalize to load.
//!
//! Layout under the volume root:
//!
//! ```text
//! new/<load_id>/           package being written by normalize
//! normalized/<load_id>/    committed, waiting for or being loaded
//! loaded/<load_id>/        fully loaded
//! ```
//!
//! Every package holds `schema.json` and one folder per job state. A job file
//! moves `new_jobs -> started_jobs -> completed_jobs | failed_jobs`; retries go
//! back to `new_jobs` with the retry counter in the name bumped. The folder a
//! job file sits in is its durable state, which is what makes crash recovery
//! possible.

use loadflow_ids::LoadId;
use loadflow_protocol::{LoaderFileFormat, Schema};
use semver::Version;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::file_storage::FileStorage;
use crate::versioned::{MigrationRegistry, VersionedStorage};

const DELIMITER: char = '.';

pub const SCHEMA_FILE_NAME: &str = "schema.json";
pub const EXCEPTION_EXTENSION: &str = "exception";

// ============================================================================
// Job File Names
// ============================================================================

/// Components of `<table_name>.<file_id>.<retry_count>.<file_format>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedJobFileName {
    pub table_name: String,
    pub file_id: String,
    pub retry_count: u32,
    pub file_format: LoaderFileFormat,
}

impl ParsedJobFileName {
    pub fn new(
        table_name: impl Into<String>,
        file_id: impl Into<String>,
        file_format: LoaderFileFormat,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            file_id: file_id.into(),
            retry_count: 0,
            file_format,
        }
    }

    pub fn parse(file_name: &str) -> Result<Self> {
        let parts: Vec<&str> = file_name.split(DELIMITER).collect();
        if parts.len() != 4 {
            return Err(StorageError::malformed(
                file_name,
                format!("expected 4 dot-separated parts, found {}", parts.len()),
            ));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(StorageError::malformed(file_name, "empty component"));
        }
        let retry_count = parts[2].parse::<u32>().map_err(|_| {
            StorageError::malformed(file_name, format!("invalid retry count '{}'", parts[2]))
        })?;
        let file_format = parts[3]
            .parse::<LoaderFileFormat>()
            .map_err(|e| StorageError::malformed(file_name, e))?;

        Ok(Self {
            table_name: parts[0].to_string(),
            file_id: parts[1].to_string(),
            retry_count,
            file_format,
        })
    }

    /// Build the file name, rejecting components that would not parse back.
    pub fn file_name(&self) -> Result<String> {
        let name = self.to_string();
        for (label, value) in [("table name", &self.table_name), ("file id", &self.file_id)] {
            if value.is_empty() || value.contains(DELIMITER) || value.contains('/') {
                return Err(StorageError::malformed(
                    name,
                    format!("{} '{}' is empty or contains '.' or '/'", label, value),
                ));
            }
        }
        Ok(name)
    }

    /// Same job, next attempt.
    pub fn next_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

impl fmt::Display for ParsedJobFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.table_name, self.file_id, self.retry_count, self.file_format
        )
    }
}

// ============================================================================
// Job States
// ============================================================================

/// Durable state of a job file, i.e. the folder it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFolder {
    New,
    Started,
    Completed,
    Failed,
}

impl JobFolder {
    pub const ALL: [JobFolder; 4] = [
        JobFolder::New,
        JobFolder::Started,
        JobFolder::Completed,
        JobFolder::Failed,
    ];

    pub fn folder_name(&self) -> &'static str {
        match self {
            JobFolder::New => "new_jobs",
            JobFolder::Started => "started_jobs",
            JobFolder::Completed => "completed_jobs",
            JobFolder::Failed => "failed_jobs",
        }
    }
}

/// Where a package currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageStage {
    New,
    Normalized,
    Loaded,
}

impl PackageStage {
    pub fn folder_name(&self) -> &'static str {
        match self {
            PackageStage::New => "new",
            PackageStage::Normalized => "normalized",
            PackageStage::Loaded => "loaded",
        }
    }
}

/// Job counts of one package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageJobCounts {
    pub new: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

impl PackageJobCounts {
    /// No job is waiting or in flight.
    pub fn is_settled(&self) -> bool {
        self.new == 0 && self.started == 0
    }

    pub fn total(&self) -> usize {
        self.new + self.started + self.completed + self.failed
    }
}

// ============================================================================
// Load Storage
// ============================================================================

#[derive(Debug)]
pub struct LoadStorage {
    versioned: VersionedStorage,
}

impl LoadStorage {
    pub const STORAGE_VERSION: Version = Version::new(1, 0, 0);

    pub fn new(volume_path: impl Into<PathBuf>, is_owner: bool) -> Result<Self> {
        Self::with_migrations(volume_path, is_owner, &MigrationRegistry::new())
    }

    pub fn with_migrations(
        volume_path: impl Into<PathBuf>,
        is_owner: bool,
        migrations: &MigrationRegistry,
    ) -> Result<Self> {
        let storage = FileStorage::new(volume_path, is_owner)?;
        let versioned = VersionedStorage::open_or_init(
            storage,
            &Self::STORAGE_VERSION,
            is_owner,
            migrations,
        )?;
        let load_storage = Self { versioned };
        if is_owner {
            for stage in [
                PackageStage::New,
                PackageStage::Normalized,
                PackageStage::Loaded,
            ] {
                load_storage.storage().create_folder(stage.folder_name(), true)?;
            }
        }
        Ok(load_storage)
    }

    pub fn storage(&self) -> &FileStorage {
        self.versioned.storage()
    }

    pub fn version(&self) -> &Version {
        self.versioned.version()
    }

    fn package_path(stage: PackageStage, load_id: &LoadId) -> PathBuf {
        PathBuf::from(stage.folder_name()).join(load_id.as_str())
    }

    fn job_path(stage: PackageStage, load_id: &LoadId, folder: JobFolder, file: &str) -> PathBuf {
        Self::package_path(stage, load_id)
            .join(folder.folder_name())
            .join(file)
    }

    /// Absolute path of a job file of a committed package.
    pub fn job_file_path(&self, load_id: &LoadId, folder: JobFolder, file_name: &str) -> PathBuf {
        self.storage().make_full_path(Self::job_path(
            PackageStage::Normalized,
            load_id,
            folder,
            file_name,
        ))
    }

    pub fn package_full_path(&self, stage: PackageStage, load_id: &LoadId) -> PathBuf {
        self.storage()
            .make_full_path(Self::package_path(stage, load_id))
    }

    // ------------------------------------------------------------------------
    // Writing packages (normalize side)
    // ------------------------------------------------------------------------

    /// Create an empty package under `new/`.
    pub fn create_temp_package(&self, load_id: &LoadId) -> Result<()> {
        let package = Self::package_path(PackageStage::New, load_id);
        self.storage().create_folder(&package, false)?;
        for folder in JobFolder::ALL {
            self.storage()
                .create_folder(package.join(folder.folder_name()), false)?;
        }
        debug!(load_id = %load_id, "Created temp package");
        Ok(())
    }

    /// Write a job file into a temp package. Returns the job file name.
    pub fn write_temp_job_file(
        &self,
        load_id: &LoadId,
        job: &ParsedJobFileName,
        content: impl AsRef<[u8]>,
    ) -> Result<String> {
        let file_name = job.file_name()?;
        self.storage().save(
            Self::job_path(PackageStage::New, load_id, JobFolder::New, &file_name),
            content,
        )?;
        Ok(file_name)
    }

    pub fn save_temp_schema(&self, load_id: &LoadId, schema: &Schema) -> Result<()> {
        let json = schema.to_json()?;
        self.storage().save(
            Self::package_path(PackageStage::New, load_id).join(SCHEMA_FILE_NAME),
            json,
        )?;
        Ok(())
    }

    /// Make a temp package visible to the load stage.
    pub fn commit_temp_package(&self, load_id: &LoadId) -> Result<()> {
        let package = Self::package_path(PackageStage::New, load_id);
        if !self.storage().has_file(package.join(SCHEMA_FILE_NAME)) {
            return Err(StorageError::invalid_state(format!(
                "Package {} has no schema and cannot be committed",
                load_id
            )));
        }
        self.storage()
            .atomic_rename(&package, Self::package_path(PackageStage::Normalized, load_id))?;
        info!(load_id = %load_id, "Committed load package");
        Ok(())
    }

    /// Remove an uncommitted package, e.g. after normalize failed half way.
    pub fn discard_temp_package(&self, load_id: &LoadId) -> Result<()> {
        let package = Self::package_path(PackageStage::New, load_id);
        if self.storage().has_folder(&package) {
            self.storage().delete_folder(&package)?;
            warn!(load_id = %load_id, "Discarded temp package");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reading packages (load side)
    // ------------------------------------------------------------------------

    /// Package ids in `stage`, oldest first.
    pub fn list_packages(&self, stage: PackageStage) -> Result<Vec<LoadId>> {
        let mut ids = Vec::new();
        for name in self.storage().list_folder_dirs(stage.folder_name())? {
            match LoadId::parse(&name) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(folder = %name, "Skipping foreign package folder: {}", e),
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn list_normalized_packages(&self) -> Result<Vec<LoadId>> {
        self.list_packages(PackageStage::Normalized)
    }

    pub fn list_loaded_packages(&self) -> Result<Vec<LoadId>> {
        self.list_packages(PackageStage::Loaded)
    }

    /// Job files of a committed package in `folder`, sorted. Exception
    /// records are not jobs and are left out.
    pub fn list_jobs(&self, load_id: &LoadId, folder: JobFolder) -> Result<Vec<String>> {
        let path = Self::package_path(PackageStage::Normalized, load_id).join(folder.folder_name());
        if !self.storage().has_folder(&path) {
            return Err(StorageError::not_found(format!(
                "Package {} is not in the normalized stage",
                load_id
            )));
        }
        let exception_suffix = format!("{}{}", DELIMITER, EXCEPTION_EXTENSION);
        let mut files: Vec<String> = self
            .storage()
            .list_folder_files(&path)?
            .into_iter()
            .filter(|name| !name.ends_with(&exception_suffix))
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn list_new_jobs(&self, load_id: &LoadId) -> Result<Vec<String>> {
        self.list_jobs(load_id, JobFolder::New)
    }

    pub fn list_started_jobs(&self, load_id: &LoadId) -> Result<Vec<String>> {
        self.list_jobs(load_id, JobFolder::Started)
    }

    pub fn list_completed_jobs(&self, load_id: &LoadId) -> Result<Vec<String>> {
        self.list_jobs(load_id, JobFolder::Completed)
    }

    pub fn list_failed_jobs(&self, load_id: &LoadId) -> Result<Vec<String>> {
        self.list_jobs(load_id, JobFolder::Failed)
    }

    pub fn job_counts(&self, load_id: &LoadId) -> Result<PackageJobCounts> {
        Ok(PackageJobCounts {
            new: self.list_new_jobs(load_id)?.len(),
            started: self.list_started_jobs(load_id)?.len(),
            completed: self.list_completed_jobs(load_id)?.len(),
            failed: self.list_failed_jobs(load_id)?.len(),
        })
    }

    pub fn load_package_schema(&self, load_id: &LoadId) -> Result<Schema> {
        let json = self.storage().load(
            Self::package_path(PackageStage::Normalized, load_id).join(SCHEMA_FILE_NAME),
        )?;
        Ok(Schema::from_json(&json)?)
    }

    // ------------------------------------------------------------------------
    // Job transitions
    // ------------------------------------------------------------------------

    fn move_job(
        &self,
        load_id: &LoadId,
        file_name: &str,
        from: JobFolder,
        to: JobFolder,
        new_name: &str,
    ) -> Result<PathBuf> {
        let source = Self::job_path(PackageStage::Normalized, load_id, from, file_name);
        if !self.storage().has_file(&source) {
            return Err(StorageError::not_found(format!(
                "Job {} not found in {} of package {}",
                file_name,
                from.folder_name(),
                load_id
            )));
        }
        let target = Self::job_path(PackageStage::Normalized, load_id, to, new_name);
        self.storage().atomic_rename(&source, &target)?;
        debug!(
            load_id = %load_id,
            job = %file_name,
            from = from.folder_name(),
            to = to.folder_name(),
            "Moved job file"
        );
        Ok(self.storage().make_full_path(target))
    }

    /// `new_jobs -> started_jobs`. Returns the started file path.
    pub fn start_job(&self, load_id: &LoadId, file_name: &str) -> Result<PathBuf> {
        self.move_job(load_id, file_name, JobFolder::New, JobFolder::Started, file_name)
    }

    /// `started_jobs -> completed_jobs`.
    pub fn complete_job(&self, load_id: &LoadId, file_name: &str) -> Result<PathBuf> {
        self.move_job(
            load_id,
            file_name,
            JobFolder::Started,
            JobFolder::Completed,
            file_name,
        )
    }

    /// `started_jobs -> failed_jobs`, recording `message` next to the file.
    pub fn fail_job(&self, load_id: &LoadId, file_name: &str, message: &str) -> Result<PathBuf> {
        let path = self.move_job(
            load_id,
            file_name,
            JobFolder::Started,
            JobFolder::Failed,
            file_name,
        )?;
        let exception_name = format!("{}{}{}", file_name, DELIMITER, EXCEPTION_EXTENSION);
        self.storage().save(
            Self::job_path(
                PackageStage::Normalized,
                load_id,
                JobFolder::Failed,
                &exception_name,
            ),
            message,
        )?;
        Ok(path)
    }

    /// `started_jobs -> new_jobs` with the retry counter bumped. Returns the
    /// new job file name.
    pub fn retry_job(&self, load_id: &LoadId, file_name: &str) -> Result<String> {
        let next = ParsedJobFileName::parse(file_name)?.next_retry().file_name()?;
        self.move_job(load_id, file_name, JobFolder::Started, JobFolder::New, &next)?;
        Ok(next)
    }

    /// Failure message recorded by [`Self::fail_job`].
    pub fn job_exception(&self, load_id: &LoadId, file_name: &str) -> Result<Option<String>> {
        let exception_name = format!("{}{}{}", file_name, DELIMITER, EXCEPTION_EXTENSION);
        let path = Self::job_path(
            PackageStage::Normalized,
            load_id,
            JobFolder::Failed,
            &exception_name,
        );
        if !self.storage().has_file(&path) {
            return Ok(None);
        }
        self.storage().load(&path).map(Some)
    }

    /// `normalized -> loaded`. Refused while jobs are pending, in flight or failed.
    pub fn complete_load_package(&self, load_id: &LoadId) -> Result<()> {
        let counts = self.job_counts(load_id)?;
        if !counts.is_settled() || counts.failed > 0 {
            return Err(StorageError::invalid_state(format!(
                "Package {} cannot complete: {} new, {} started, {} failed jobs",
                load_id, counts.new, counts.started, counts.failed
            )));
        }
        self.storage().atomic_rename(
            Self::package_path(PackageStage::Normalized, load_id),
            Self::package_path(PackageStage::Loaded, load_id),
        )?;
        info!(load_id = %load_id, jobs = counts.completed, "Load package completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn committed_package(storage: &LoadStorage, jobs: &[&str]) -> LoadId {
        let load_id = LoadId::new();
        storage.create_temp_package(&load_id).unwrap();
        for table in jobs {
            let job = ParsedJobFileName::new(*table, "f1", LoaderFileFormat::Jsonl);
            storage.write_temp_job_file(&load_id, &job, "{}\n").unwrap();
        }
        storage
            .save_temp_schema(&load_id, &Schema::new("events"))
            .unwrap();
        storage.commit_temp_package(&load_id).unwrap();
        load_id
    }

    #[test]
    fn test_job_file_name_round_trip() {
        let job = ParsedJobFileName::new("users", "abc", LoaderFileFormat::InsertValues);
        let name = job.file_name().unwrap();
        assert_eq!(name, "users.abc.0.insert_values");
        assert_eq!(ParsedJobFileName::parse(&name).unwrap(), job);
        assert_eq!(job.next_retry().to_string(), "users.abc.1.insert_values");
    }

    #[test]
    fn test_job_file_name_rejects_garbage() {
        for bad in [
            "users.abc.0",
            "users.abc.x.jsonl",
            "users.abc.0.parquet",
            "users..0.jsonl",
            "a.b.c.0.jsonl",
        ] {
            assert!(ParsedJobFileName::parse(bad).is_err(), "{}", bad);
        }
        let job = ParsedJobFileName::new("my.table", "abc", LoaderFileFormat::Jsonl);
        assert!(job.file_name().is_err());
    }

    #[test]
    fn test_package_lifecycle() {
        let dir = TempDir::new().unwrap();
        let storage = LoadStorage::new(dir.path(), true).unwrap();
        let load_id = committed_package(&storage, &["users", "orders"]);

        assert_eq!(storage.list_normalized_packages().unwrap(), vec![load_id.clone()]);
        assert_eq!(storage.list_new_jobs(&load_id).unwrap().len(), 2);

        let job = "users.f1.0.jsonl";
        let started = storage.start_job(&load_id, job).unwrap();
        assert!(started.is_file());
        assert!(storage.complete_load_package(&load_id).is_err());

        storage.complete_job(&load_id, job).unwrap();
        storage.start_job(&load_id, "orders.f1.0.jsonl").unwrap();
        storage.complete_job(&load_id, "orders.f1.0.jsonl").unwrap();

        storage.complete_load_package(&load_id).unwrap();
        assert!(storage.list_normalized_packages().unwrap().is_empty());
        assert_eq!(storage.list_loaded_packages().unwrap(), vec![load_id]);
    }

    #[test]
    fn test_retry_bumps_counter() {
        let dir = TempDir::new().unwrap();
        let storage = LoadStorage::new(dir.path(), true).unwrap();
        let load_id = committed_package(&storage, &["users"]);

        storage.start_job(&load_id, "users.f1.0.jsonl").unwrap();
        let retried = storage.retry_job(&load_id, "users.f1.0.jsonl").unwrap();
        assert_eq!(retried, "users.f1.1.jsonl");
        assert_eq!(storage.list_new_jobs(&load_id).unwrap(), vec![retried]);
        assert!(storage.list_started_jobs(&load_id).unwrap().is_empty());
    }

    #[test]
    fn test_failed_job_keeps_exception_and_blocks_completion() {
        let dir = TempDir::new().unwrap();
        let storage = LoadStorage::new(dir.path(), true).unwrap();
        let load_id = committed_package(&storage, &["users"]);

        storage.start_job(&load_id, "users.f1.0.jsonl").unwrap();
        storage
            .fail_job(&load_id, "users.f1.0.jsonl", "table locked")
            .unwrap();

        assert_eq!(
            storage.list_failed_jobs(&load_id).unwrap(),
            vec!["users.f1.0.jsonl"]
        );
        assert_eq!(
            storage.job_exception(&load_id, "users.f1.0.jsonl").unwrap(),
            Some("table locked".to_string())
        );
        assert!(matches!(
            storage.complete_load_package(&load_id),
            Err(StorageError::InvalidState(_))
        ));
    }

    #[test]
    fn test_commit_requires_schema() {
        let dir = TempDir::new().unwrap();
        let storage = LoadStorage::new(dir.path(), true).unwrap();
        let load_id = LoadId::new();
        storage.create_temp_package(&load_id).unwrap();
        assert!(storage.commit_temp_package(&load_id).is_err());

        storage.discard_temp_package(&load_id).unwrap();
        assert!(!storage
            .package_full_path(PackageStage::New, &load_id)
            .exists());
    }

    #[test]
    fn test_move_missing_job() {
        let dir = TempDir::new().unwrap();
        let storage = LoadStorage::new(dir.path(), true).unwrap();
        let load_id = committed_package(&storage, &["users"]);
        assert!(matches!(
            storage.complete_job(&load_id, "users.f1.0.jsonl"),
            Err(StorageError::NotFound(_))
        ));
    }
}
