//! Handoff area between extraction and normalization.
//!
//! Extracted files live in a single `extracted` folder and are named
//! `<schema_name>.<table_name>.<file_id>.jsonl`. The name is the only record
//! of which schema and table a file belongs to.

use loadflow_ids::FileId;
use loadflow_protocol::defaults::EXTRACTED_FILE_EXTENSION;
use semver::Version;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::file_storage::FileStorage;
use crate::versioned::{MigrationRegistry, VersionedStorage};

const DELIMITER: char = '.';

/// Components encoded in an extracted file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedExtractedFileName {
    pub schema_name: String,
    pub table_name: String,
    pub file_id: String,
}

/// Files of one schema, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaGroup {
    pub schema_name: String,
    pub files: Vec<String>,
}

#[derive(Debug)]
pub struct NormalizeStorage {
    versioned: VersionedStorage,
}

impl NormalizeStorage {
    pub const STORAGE_VERSION: Version = Version::new(1, 0, 0);
    pub const EXTRACTED_FOLDER: &'static str = "extracted";

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
        let normalize_storage = Self { versioned };
        if is_owner {
            normalize_storage.initialize_storage()?;
        }
        Ok(normalize_storage)
    }

    fn initialize_storage(&self) -> Result<()> {
        self.storage().create_folder(Self::EXTRACTED_FOLDER, true)
    }

    pub fn storage(&self) -> &FileStorage {
        self.versioned.storage()
    }

    pub fn version(&self) -> &Version {
        self.versioned.version()
    }

    /// Extracted files in lexicographic order, ready for [`Self::group_by_schema`].
    pub fn list_files_to_normalize_sorted(&self) -> Result<Vec<String>> {
        let mut files = self.storage().list_folder_files(Self::EXTRACTED_FOLDER)?;
        files.sort();
        Ok(files)
    }

    /// Extracted files whose names are not UTF-8, converted lossily. They can
    /// never parse as extracted file names and stay where they are.
    pub fn list_non_utf8_files(&self) -> Result<Vec<String>> {
        let mut files = self.storage().list_non_utf8_files(Self::EXTRACTED_FOLDER)?;
        files.sort();
        Ok(files)
    }

    /// Group files by schema name using adjacent runs.
    ///
    /// Input MUST already be sorted (see [`Self::list_files_to_normalize_sorted`]).
    /// A new group starts whenever the schema name differs from the previous
    /// file's, so unsorted input silently yields several groups for the same
    /// schema. Malformed names are yielded as errors for that file only and do
    /// not interrupt the surrounding group.
    pub fn group_by_schema<I>(files: I) -> SchemaGroups<I::IntoIter>
    where
        I: IntoIterator<Item = String>,
    {
        SchemaGroups {
            files: files.into_iter(),
            carry: None,
            errors: VecDeque::new(),
        }
    }

    pub fn get_schema_name(file_name: &str) -> Result<String> {
        Ok(Self::parse_normalize_file_name(file_name)?.schema_name)
    }

    /// `<schema_name>.<table_name>.<file_id>`. Components must be non-empty
    /// and free of the delimiter and path separators.
    pub fn build_extracted_file_stem(
        schema_name: &str,
        table_name: &str,
        file_id: &str,
    ) -> Result<String> {
        let stem = format!(
            "{}{}{}{}{}",
            schema_name, DELIMITER, table_name, DELIMITER, file_id
        );
        for (label, value) in [
            ("schema name", schema_name),
            ("table name", table_name),
            ("file id", file_id),
        ] {
            if let Some(reason) = invalid_component(value) {
                return Err(StorageError::malformed(stem, format!("{} {}", label, reason)));
            }
        }
        Ok(stem)
    }

    /// Full file name: stem plus the `jsonl` extension.
    pub fn build_extracted_file_name(
        schema_name: &str,
        table_name: &str,
        file_id: &str,
    ) -> Result<String> {
        let stem = Self::build_extracted_file_stem(schema_name, table_name, file_id)?;
        Ok(format!("{}{}{}", stem, DELIMITER, EXTRACTED_FILE_EXTENSION))
    }

    /// Strict inverse of [`Self::build_extracted_file_name`].
    pub fn parse_normalize_file_name(file_name: &str) -> Result<ParsedExtractedFileName> {
        let suffix = format!("{}{}", DELIMITER, EXTRACTED_FILE_EXTENSION);
        let stem = file_name.strip_suffix(&suffix).ok_or_else(|| {
            StorageError::malformed(
                file_name,
                format!("expected .{} extension", EXTRACTED_FILE_EXTENSION),
            )
        })?;
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(StorageError::malformed(file_name, "contains a path separator"));
        }

        let parts: Vec<&str> = stem.split(DELIMITER).collect();
        if parts.len() != 3 {
            return Err(StorageError::malformed(
                file_name,
                format!("expected 3 dot-separated parts, found {}", parts.len()),
            ));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(StorageError::malformed(file_name, "empty component"));
        }

        Ok(ParsedExtractedFileName {
            schema_name: parts[0].to_string(),
            table_name: parts[1].to_string(),
            file_id: parts[2].to_string(),
        })
    }

    pub fn extracted_file_path(&self, file_name: &str) -> PathBuf {
        self.storage()
            .make_full_path(PathBuf::from(Self::EXTRACTED_FOLDER).join(file_name))
    }

    /// Write `records` as JSONL under a fresh file id. Returns the file name.
    pub fn save_extracted_file(
        &self,
        schema_name: &str,
        table_name: &str,
        records: &[Value],
    ) -> Result<String> {
        let file_id = FileId::new();
        let file_name =
            Self::build_extracted_file_name(schema_name, table_name, file_id.as_str())?;

        let mut payload = String::new();
        for record in records {
            payload.push_str(&serde_json::to_string(record)?);
            payload.push('\n');
        }

        self.storage().save(
            PathBuf::from(Self::EXTRACTED_FOLDER).join(&file_name),
            payload,
        )?;
        info!(
            file = %file_name,
            records = records.len(),
            "Staged extracted file"
        );
        Ok(file_name)
    }

    /// Read all records of an extracted file. Blank lines are skipped.
    pub fn read_extracted_file(&self, file_name: &str) -> Result<Vec<Value>> {
        let content = self
            .storage()
            .load(PathBuf::from(Self::EXTRACTED_FOLDER).join(file_name))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    pub fn delete_extracted_file(&self, file_name: &str) -> Result<()> {
        debug!(file = %file_name, "Deleting extracted file");
        self.storage()
            .delete(PathBuf::from(Self::EXTRACTED_FOLDER).join(file_name))
    }
}

fn invalid_component(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        Some("is empty")
    } else if value.contains(DELIMITER) {
        Some("contains the '.' delimiter")
    } else if value.contains('/') || value.contains('\\') {
        Some("contains a path separator")
    } else {
        None
    }
}

/// Lazy adjacent-run grouping, see [`NormalizeStorage::group_by_schema`].
pub struct SchemaGroups<I> {
    files: I,
    /// First file of the next group, already parsed.
    carry: Option<(String, String)>,
    /// Malformed names seen while a group was open.
    errors: VecDeque<StorageError>,
}

impl<I> Iterator for SchemaGroups<I>
where
    I: Iterator<Item = String>,
{
    type Item = Result<SchemaGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.errors.pop_front() {
            return Some(Err(err));
        }

        let (schema_name, first) = match self.carry.take() {
            Some(carry) => carry,
            None => loop {
                let name = self.files.next()?;
                match NormalizeStorage::get_schema_name(&name) {
                    Ok(schema) => break (schema, name),
                    Err(e) => return Some(Err(e)),
                }
            },
        };

        let mut files = vec![first];
        for name in self.files.by_ref() {
            match NormalizeStorage::get_schema_name(&name) {
                Ok(schema) if schema == schema_name => files.push(name),
                Ok(schema) => {
                    self.carry = Some((schema, name));
                    break;
                }
                Err(e) => self.errors.push_back(e),
            }
        }

        Some(Ok(SchemaGroup { schema_name, files }))
    }
}
