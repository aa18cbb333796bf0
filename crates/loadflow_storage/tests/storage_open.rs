//! Opening versioned storages on disk.

use loadflow_storage::{
    FileStorage, LoadStorage, MigrationRegistry, NormalizeStorage, SchemaGroup, StorageError,
    VERSION_FILE,
};
use semver::Version;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

#[test]
fn owner_stamps_fresh_volume() {
    let dir = TempDir::new().unwrap();
    let storage = NormalizeStorage::new(dir.path(), true).unwrap();

    assert_eq!(storage.version(), &v("1.0.0"));
    assert_eq!(
        fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
        "1.0.0"
    );
    assert!(dir.path().join(NormalizeStorage::EXTRACTED_FOLDER).is_dir());
}

#[test]
fn matching_version_opens_without_writes() {
    let dir = TempDir::new().unwrap();
    NormalizeStorage::new(dir.path(), true).unwrap();
    let marker = dir.path().join(VERSION_FILE);
    let before = fs::metadata(&marker).unwrap().modified().unwrap();

    let reader = NormalizeStorage::new(dir.path(), false).unwrap();
    assert_eq!(reader.version(), &v("1.0.0"));
    assert_eq!(fs::metadata(&marker).unwrap().modified().unwrap(), before);
}

#[test]
fn non_owner_cannot_initialize() {
    let dir = TempDir::new().unwrap();
    let err = LoadStorage::new(dir.path(), false).unwrap_err();
    assert!(matches!(err, StorageError::NotInitialized(_)));
    assert!(!dir.path().join(VERSION_FILE).exists());
}

#[test]
fn older_version_without_migration_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(VERSION_FILE), "0.9.0").unwrap();

    let err = NormalizeStorage::new(dir.path(), true).unwrap_err();
    assert!(matches!(err, StorageError::NoMigrationPath { .. }));
    assert!(err.is_configuration());
    assert_eq!(
        fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
        "0.9.0"
    );
}

#[test]
fn migration_chain_is_applied_in_order() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(VERSION_FILE), "0.9.0").unwrap();

    let mut registry = MigrationRegistry::new();
    registry
        .register(v("0.9.0"), v("0.9.5"), |storage: &FileStorage| {
            storage.save("step_a", "done")?;
            Ok(())
        })
        .unwrap();
    registry
        .register(v("0.9.5"), v("1.0.0"), |storage: &FileStorage| {
            // First step must already be visible
            let previous = storage.load("step_a")?;
            storage.save("step_b", previous)?;
            Ok(())
        })
        .unwrap();

    let storage = NormalizeStorage::with_migrations(dir.path(), true, &registry).unwrap();
    assert_eq!(storage.version(), &v("1.0.0"));
    assert_eq!(fs::read_to_string(dir.path().join("step_b")).unwrap(), "done");
    assert_eq!(
        fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
        "1.0.0"
    );
}

#[test]
fn non_owner_never_migrates() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(VERSION_FILE), "0.9.0").unwrap();
    let mut registry = MigrationRegistry::new();
    registry
        .register(v("0.9.0"), v("1.0.0"), |_: &FileStorage| Ok(()))
        .unwrap();

    let err = LoadStorage::with_migrations(dir.path(), false, &registry).unwrap_err();
    assert!(matches!(err, StorageError::MigrationRequiresOwner { .. }));
}

#[test]
fn extracted_files_group_by_schema() {
    let dir = TempDir::new().unwrap();
    let storage = NormalizeStorage::new(dir.path(), true).unwrap();
    storage
        .save_extracted_file("b", "t", &[json!({"id": 1})])
        .unwrap();
    let a1 = storage
        .save_extracted_file("a", "t", &[json!({"id": 2})])
        .unwrap();
    let a2 = storage
        .save_extracted_file("a", "u", &[json!({"id": 3}), json!({"id": 4})])
        .unwrap();

    let files = storage.list_files_to_normalize_sorted().unwrap();
    let groups: Vec<SchemaGroup> = NormalizeStorage::group_by_schema(files)
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].schema_name, "a");
    let mut expected = vec![a1, a2.clone()];
    expected.sort();
    assert_eq!(groups[0].files, expected);
    assert_eq!(groups[1].schema_name, "b");

    let records = storage.read_extracted_file(&a2).unwrap();
    assert_eq!(records, vec![json!({"id": 3}), json!({"id": 4})]);

    storage.delete_extracted_file(&a2).unwrap();
    assert_eq!(storage.list_files_to_normalize_sorted().unwrap().len(), 2);
}
