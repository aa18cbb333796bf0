//! Version-stamped storage.
//!
//! A storage root carries a `.version` marker with a semantic version. Opening
//! compares it with the version the code expects:
//!
//! - no marker: the owner stamps it, anyone else fails
//! - equal: proceed, nothing is written
//! - different: the owner applies a registered migration chain, stamping the
//!   marker after every step; without a complete chain the open fails before
//!   anything is touched
//!
//! Initialization and migration run under the root's exclusive lock.

use semver::Version;
use std::fmt;
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::file_storage::FileStorage;
use crate::lock::VolumeLock;

pub const VERSION_FILE: &str = ".version";

type MigrationFn = Box<dyn Fn(&FileStorage) -> Result<()> + Send + Sync>;

/// One upgrade step between two storage versions.
pub struct Migration {
    from: Version,
    to: Version,
    apply: MigrationFn,
}

impl Migration {
    pub fn from_version(&self) -> &Version {
        &self.from
    }

    pub fn to_version(&self) -> &Version {
        &self.to
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migration({} -> {})", self.from, self.to)
    }
}

/// Ordered set of upgrade steps for one kind of storage.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Steps must strictly upgrade.
    pub fn register(
        &mut self,
        from: Version,
        to: Version,
        apply: impl Fn(&FileStorage) -> Result<()> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        if to <= from {
            return Err(StorageError::invalid_state(format!(
                "Migration must upgrade: {} -> {}",
                from, to
            )));
        }
        self.migrations.push(Migration {
            from,
            to,
            apply: Box::new(apply),
        });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Chain of steps leading from `from` exactly to `to`, if one exists.
    ///
    /// At every version the step reaching furthest without overshooting the
    /// target is taken.
    pub fn plan(&self, from: &Version, to: &Version) -> Option<Vec<&Migration>> {
        let mut steps = Vec::new();
        let mut current = from;
        while current != to {
            let next = self
                .migrations
                .iter()
                .filter(|m| &m.from == current && &m.to <= to)
                .max_by(|a, b| a.to.cmp(&b.to))?;
            steps.push(next);
            current = &next.to;
        }
        Some(steps)
    }
}

/// Storage whose on-disk layout matches a known version.
#[derive(Debug)]
pub struct VersionedStorage {
    storage: FileStorage,
    version: Version,
    is_owner: bool,
}

impl VersionedStorage {
    /// Open `storage` expecting `expected`; see the module docs for the rules.
    pub fn open_or_init(
        storage: FileStorage,
        expected: &Version,
        is_owner: bool,
        migrations: &MigrationRegistry,
    ) -> Result<Self> {
        if let Some(stored) = read_marker(&storage)? {
            if &stored == expected {
                return Ok(Self::opened(storage, expected, is_owner));
            }
            // Fail before taking the lock when no chain exists
            Self::check_migration(&storage, &stored, expected, is_owner, migrations)?;
        } else if !is_owner {
            return Err(StorageError::NotInitialized(storage.root().to_path_buf()));
        }

        let _lock = VolumeLock::acquire(storage.root(), &format!("open at {}", expected))?;

        // Another owner may have finished while we waited for the lock
        match read_marker(&storage)? {
            None => {
                write_marker(&storage, expected)?;
                info!(
                    root = %storage.root().display(),
                    version = %expected,
                    "Initialized storage"
                );
            }
            Some(stored) if &stored == expected => {}
            Some(stored) => {
                let steps =
                    Self::check_migration(&storage, &stored, expected, is_owner, migrations)?;
                for step in steps {
                    info!(
                        root = %storage.root().display(),
                        from = %step.from,
                        to = %step.to,
                        "Migrating storage"
                    );
                    (step.apply)(&storage).map_err(|e| {
                        warn!(
                            root = %storage.root().display(),
                            "Storage migration step failed: {}", e
                        );
                        StorageError::MigrationFailed {
                            root: storage.root().to_path_buf(),
                            from: step.from.to_string(),
                            to: step.to.to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    write_marker(&storage, &step.to)?;
                }
            }
        }

        Ok(Self::opened(storage, expected, is_owner))
    }

    fn check_migration<'m>(
        storage: &FileStorage,
        stored: &Version,
        expected: &Version,
        is_owner: bool,
        migrations: &'m MigrationRegistry,
    ) -> Result<Vec<&'m Migration>> {
        let steps =
            migrations
                .plan(stored, expected)
                .ok_or_else(|| StorageError::NoMigrationPath {
                    root: storage.root().to_path_buf(),
                    stored: stored.to_string(),
                    expected: expected.to_string(),
                })?;
        if !is_owner {
            return Err(StorageError::MigrationRequiresOwner {
                root: storage.root().to_path_buf(),
                stored: stored.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(steps)
    }

    fn opened(storage: FileStorage, version: &Version, is_owner: bool) -> Self {
        Self {
            storage,
            version: version.clone(),
            is_owner,
        }
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

/// Read the version marker, `None` when the storage was never stamped.
pub fn read_marker(storage: &FileStorage) -> Result<Option<Version>> {
    if !storage.has_file(VERSION_FILE) {
        return Ok(None);
    }
    let raw = storage.load(VERSION_FILE)?;
    let marker = raw.trim();
    Version::parse(marker)
        .map(Some)
        .map_err(|e| StorageError::InvalidVersionMarker {
            root: storage.root().to_path_buf(),
            marker: marker.to_string(),
            message: e.to_string(),
        })
}

fn write_marker(storage: &FileStorage, version: &Version) -> Result<()> {
    storage.save(VERSION_FILE, version.to_string())?;
    Ok(())
}
