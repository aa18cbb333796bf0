//! The normalize stage.
//!
//! One pass over the extracted folder:
//!
//! 1. list and group files by schema (adjacent runs over sorted names)
//! 2. per group, open a temp package under a fresh load id
//! 3. per file, read the records, record tables and columns in the schema,
//!    check them against the destination limits and write one job file in
//!    the negotiated format
//! 4. save the schema, commit the package, delete the normalized files
//!
//! A file that cannot be normalized stays in the extracted folder and is
//! reported; the rest of its group still goes out.

use loadflow_destination::DestinationCapabilities;
use loadflow_ids::LoadId;
use loadflow_protocol::{LoaderFileFormat, NormalizeConfig, Schema};
use loadflow_storage::{
    LoadStorage, NormalizeStorage, ParsedJobFileName, SchemaGroup, StorageError,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{NormalizeError, Result};
use crate::writers::{can_write, text_value, write_job_file};

/// Committed package produced by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub load_id: LoadId,
    pub schema_name: String,
    pub job_files: Vec<String>,
}

/// Extracted file that was left in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub packages: Vec<PackageSummary>,
    /// Names that do not follow the extracted file convention.
    pub malformed_files: Vec<SkippedFile>,
    /// Well named files whose content could not be normalized.
    pub failed_files: Vec<SkippedFile>,
}

impl NormalizeReport {
    pub fn is_clean(&self) -> bool {
        self.malformed_files.is_empty() && self.failed_files.is_empty()
    }

    pub fn job_count(&self) -> usize {
        self.packages.iter().map(|p| p.job_files.len()).sum()
    }
}

pub struct Normalize {
    normalize_storage: NormalizeStorage,
    load_storage: LoadStorage,
    capabilities: DestinationCapabilities,
    file_format: LoaderFileFormat,
}

impl Normalize {
    /// Negotiate the output format once. An empty overlap between what
    /// `config` can produce and what the destination supports is fatal.
    pub fn new(
        normalize_storage: NormalizeStorage,
        load_storage: LoadStorage,
        config: &NormalizeConfig,
        capabilities: DestinationCapabilities,
    ) -> Result<Self> {
        let producible: Vec<LoaderFileFormat> = config
            .producible_formats
            .iter()
            .copied()
            .filter(|f| can_write(*f))
            .collect();
        if producible.len() != config.producible_formats.len() {
            warn!(
                configured = ?config.producible_formats,
                writable = ?producible,
                "Ignoring producible formats without a writer"
            );
        }
        capabilities.validate()?;
        let file_format = capabilities.negotiate_file_format(&producible)?;
        info!(format = %file_format, "Negotiated loader file format");

        Ok(Self {
            normalize_storage,
            load_storage,
            capabilities,
            file_format,
        })
    }

    pub fn file_format(&self) -> LoaderFileFormat {
        self.file_format
    }

    pub fn normalize_storage(&self) -> &NormalizeStorage {
        &self.normalize_storage
    }

    pub fn load_storage(&self) -> &LoadStorage {
        &self.load_storage
    }

    /// Normalize everything in the extracted folder.
    ///
    /// `schemas` supplies the current schema per name and receives the
    /// updated ones. Schemas not present start empty.
    pub fn run(&self, schemas: &mut BTreeMap<String, Schema>) -> Result<NormalizeReport> {
        let files = self.normalize_storage.list_files_to_normalize_sorted()?;
        info!(files = files.len(), "Normalizing extracted files");

        let mut report = NormalizeReport::default();
        for name in self.normalize_storage.list_non_utf8_files()? {
            warn!(file = %name, "Skipping extracted file with a non UTF-8 name");
            report.malformed_files.push(SkippedFile {
                file_name: name,
                reason: "file name is not valid UTF-8".to_string(),
            });
        }
        for group in NormalizeStorage::group_by_schema(files) {
            match group {
                Ok(group) => {
                    let schema = schemas
                        .entry(group.schema_name.clone())
                        .or_insert_with(|| Schema::new(&group.schema_name));
                    if let Some(package) = self.normalize_group(&group, schema, &mut report)? {
                        report.packages.push(package);
                    }
                }
                Err(StorageError::MalformedFileName { name, reason }) => {
                    warn!(file = %name, "Skipping malformed extracted file: {}", reason);
                    report.malformed_files.push(SkippedFile {
                        file_name: name,
                        reason,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            packages = report.packages.len(),
            jobs = report.job_count(),
            malformed = report.malformed_files.len(),
            failed = report.failed_files.len(),
            "Normalize finished"
        );
        Ok(report)
    }

    fn normalize_group(
        &self,
        group: &SchemaGroup,
        schema: &mut Schema,
        report: &mut NormalizeReport,
    ) -> Result<Option<PackageSummary>> {
        let load_id = LoadId::new();
        self.load_storage.create_temp_package(&load_id)?;

        let outcome = self.fill_package(&load_id, group, schema, report);
        let (job_files, normalized) = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.load_storage.discard_temp_package(&load_id)?;
                return Err(e);
            }
        };

        if job_files.is_empty() {
            self.load_storage.discard_temp_package(&load_id)?;
            return Ok(None);
        }

        self.load_storage.save_temp_schema(&load_id, schema)?;
        self.load_storage.commit_temp_package(&load_id)?;
        for file_name in &normalized {
            self.normalize_storage.delete_extracted_file(file_name)?;
        }
        info!(
            load_id = %load_id,
            schema = %group.schema_name,
            jobs = job_files.len(),
            "Load package ready"
        );

        Ok(Some(PackageSummary {
            load_id,
            schema_name: group.schema_name.clone(),
            job_files,
        }))
    }

    /// Write one job file per extracted file. Returns the job files and the
    /// extracted files they came from.
    fn fill_package(
        &self,
        load_id: &LoadId,
        group: &SchemaGroup,
        schema: &mut Schema,
        report: &mut NormalizeReport,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut job_files = Vec::new();
        let mut normalized = Vec::new();

        for file_name in &group.files {
            let parsed = NormalizeStorage::parse_normalize_file_name(file_name)?;
            let records = match self.read_records(file_name) {
                Ok(records) => records,
                Err(e) => {
                    Self::skip(report, file_name, e)?;
                    continue;
                }
            };

            // Work on a copy so a rejected file leaves no trace in the schema
            let mut candidate = schema.clone();
            let rendered = self.render(file_name, &parsed.table_name, &records, &mut candidate);
            let content = match rendered {
                Ok(content) => content,
                Err(e) => {
                    Self::skip(report, file_name, e)?;
                    continue;
                }
            };

            let job = ParsedJobFileName::new(&parsed.table_name, &parsed.file_id, self.file_format);
            let job_file = self.load_storage.write_temp_job_file(load_id, &job, content)?;
            debug!(source = %file_name, job = %job_file, records = records.len(), "Wrote job file");

            *schema = candidate;
            job_files.push(job_file);
            normalized.push(file_name.clone());
        }

        Ok((job_files, normalized))
    }

    fn read_records(&self, file_name: &str) -> Result<Vec<Value>> {
        let records = self.normalize_storage.read_extracted_file(file_name)?;
        for (index, record) in records.iter().enumerate() {
            if !record.is_object() {
                return Err(NormalizeError::InvalidRecord {
                    file: file_name.to_string(),
                    record: index + 1,
                    message: "expected a JSON object".to_string(),
                });
            }
        }
        Ok(records)
    }

    /// Record the table's columns in `schema`, check every limit and render
    /// the job file.
    fn render(
        &self,
        file_name: &str,
        table_name: &str,
        records: &[Value],
        schema: &mut Schema,
    ) -> Result<String> {
        let caps = &self.capabilities;
        caps.check_identifier(table_name)
            .map_err(|e| NormalizeError::limit(file_name, e))?;

        for record in records {
            if let Value::Object(fields) = record {
                schema.observe_table(table_name, fields.keys().map(String::as_str));
                for text in fields.values().filter_map(text_value) {
                    caps.check_text(&text)
                        .map_err(|e| NormalizeError::limit(file_name, e))?;
                }
            }
        }
        if records.is_empty() {
            schema.observe_table(table_name, std::iter::empty());
        }

        let columns: Vec<String> = match schema.table(table_name) {
            Some(table) => table.column_names().map(str::to_string).collect(),
            None => Vec::new(),
        };
        for column in &columns {
            caps.check_column_identifier(column)
                .map_err(|e| NormalizeError::limit(file_name, e))?;
        }

        write_job_file(self.file_format, table_name, &columns, records, caps)
            .map_err(|e| NormalizeError::limit(file_name, e))
    }

    /// File level failures are reported, anything else aborts the group.
    fn skip(report: &mut NormalizeReport, file_name: &str, error: NormalizeError) -> Result<()> {
        match error {
            NormalizeError::Limit { .. }
            | NormalizeError::InvalidRecord { .. }
            | NormalizeError::Storage(StorageError::Serialization(_)) => {
                warn!(file = %file_name, "Cannot normalize file: {}", error);
                report.failed_files.push(SkippedFile {
                    file_name: file_name.to_string(),
                    reason: error.to_string(),
                });
                Ok(())
            }
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadflow_destination::destinations::dummy::dummy_capabilities;
    use serde_json::json;
    use tempfile::TempDir;

    fn stage(
        dir: &TempDir,
        caps: DestinationCapabilities,
        formats: Vec<LoaderFileFormat>,
    ) -> Normalize {
        let normalize_storage = NormalizeStorage::new(dir.path().join("normalize"), true).unwrap();
        let load_storage = LoadStorage::new(dir.path().join("load"), true).unwrap();
        let config = NormalizeConfig {
            producible_formats: formats,
        };
        Normalize::new(normalize_storage, load_storage, &config, caps).unwrap()
    }

    #[test]
    fn test_negotiates_preferred_format() {
        let dir = TempDir::new().unwrap();
        let mut caps = dummy_capabilities();
        caps.preferred_loader_file_format = LoaderFileFormat::InsertValues;
        let stage = stage(
            &dir,
            caps,
            vec![LoaderFileFormat::Jsonl, LoaderFileFormat::InsertValues],
        );
        assert_eq!(stage.file_format(), LoaderFileFormat::InsertValues);
    }

    #[test]
    fn test_unwritable_formats_are_not_offered() {
        let dir = TempDir::new().unwrap();
        let mut caps = dummy_capabilities();
        caps.preferred_loader_file_format = LoaderFileFormat::Csv;
        caps.supported_loader_file_formats = vec![LoaderFileFormat::Csv];
        let config = NormalizeConfig {
            producible_formats: vec![LoaderFileFormat::Csv],
        };
        let err = Normalize::new(
            NormalizeStorage::new(dir.path().join("normalize"), true).unwrap(),
            LoadStorage::new(dir.path().join("load"), true).unwrap(),
            &config,
            caps,
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejected_file_leaves_schema_untouched() {
        let dir = TempDir::new().unwrap();
        let mut caps = dummy_capabilities();
        caps.max_column_identifier_length = 5;
        let stage = stage(&dir, caps, vec![LoaderFileFormat::Jsonl]);
        let storage = stage.normalize_storage();
        storage
            .save_extracted_file("events", "users", &[json!({"id": 1})])
            .unwrap();
        let bad = storage
            .save_extracted_file("events", "orders", &[json!({"order_number": 1})])
            .unwrap();

        let mut schemas = BTreeMap::new();
        let report = stage.run(&mut schemas).unwrap();

        assert_eq!(report.packages.len(), 1);
        assert_eq!(report.failed_files.len(), 1);
        assert_eq!(report.failed_files[0].file_name, bad);
        let schema = &schemas["events"];
        assert!(schema.table("users").is_some());
        assert!(schema.table("orders").is_none());
        // Rejected file stays for inspection
        assert_eq!(
            stage.normalize_storage().list_files_to_normalize_sorted().unwrap(),
            vec![bad]
        );
    }
}
