//! Normalizing staged files into load packages on disk.

use loadflow_destination::destinations::dummy::dummy_capabilities;
use loadflow_destination::DestinationCapabilities;
use loadflow_normalize::Normalize;
use loadflow_protocol::{LoaderFileFormat, NormalizeConfig, Schema};
use loadflow_storage::{LoadStorage, NormalizeStorage, ParsedJobFileName};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

fn normalize_stage(dir: &TempDir, max_query_length: usize) -> Normalize {
    let mut caps = dummy_capabilities();
    caps.preferred_loader_file_format = LoaderFileFormat::InsertValues;
    caps.max_query_length = max_query_length;
    normalize_stage_with(dir, caps)
}

fn normalize_stage_with(dir: &TempDir, caps: DestinationCapabilities) -> Normalize {
    Normalize::new(
        NormalizeStorage::new(dir.path().join("normalize"), true).unwrap(),
        LoadStorage::new(dir.path().join("load"), true).unwrap(),
        &NormalizeConfig::default(),
        caps,
    )
    .unwrap()
}

#[test]
fn one_package_per_schema() {
    let dir = TempDir::new().unwrap();
    let stage = normalize_stage(&dir, 64 * 1024);
    let staging = stage.normalize_storage();
    staging
        .save_extracted_file("billing", "invoices", &[json!({"id": 1, "total": 9.5})])
        .unwrap();
    staging
        .save_extracted_file("crm", "users", &[json!({"id": 1, "email": "a@b.c"})])
        .unwrap();
    staging
        .save_extracted_file("crm", "users", &[json!({"id": 2, "name": "Bo"})])
        .unwrap();

    let mut schemas = BTreeMap::new();
    schemas.insert("crm".to_string(), Schema::new("crm"));
    let report = stage.run(&mut schemas).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.packages.len(), 2);
    assert_eq!(report.packages[0].schema_name, "billing");
    assert_eq!(report.packages[1].schema_name, "crm");
    assert_eq!(report.job_count(), 3);
    assert!(staging.list_files_to_normalize_sorted().unwrap().is_empty());

    let load = stage.load_storage();
    let crm_package = &report.packages[1].load_id;
    let jobs = load.list_new_jobs(crm_package).unwrap();
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        let parsed = ParsedJobFileName::parse(job).unwrap();
        assert_eq!(parsed.table_name, "users");
        assert_eq!(parsed.retry_count, 0);
        assert_eq!(parsed.file_format, LoaderFileFormat::InsertValues);
    }

    let schema = load.load_package_schema(crm_package).unwrap();
    let mut columns: Vec<&str> = schema.table("users").unwrap().column_names().collect();
    columns.sort();
    assert_eq!(columns, vec!["email", "id", "name"]);
    assert_eq!(schemas["crm"], schema);
}

#[test]
fn oversized_rows_fail_the_file_not_the_run() {
    let dir = TempDir::new().unwrap();
    let stage = normalize_stage(&dir, 200);
    let staging = stage.normalize_storage();
    let big = staging
        .save_extracted_file("crm", "notes", &[json!({"body": "x".repeat(500)})])
        .unwrap();
    staging
        .save_extracted_file("crm", "users", &[json!({"id": 1})])
        .unwrap();

    let report = stage.run(&mut BTreeMap::new()).unwrap();
    assert_eq!(report.packages.len(), 1);
    assert_eq!(report.failed_files.len(), 1);
    assert_eq!(report.failed_files[0].file_name, big);
    assert!(report.failed_files[0].reason.contains("query"));
}

#[test]
fn malformed_names_are_reported_and_kept() {
    let dir = TempDir::new().unwrap();
    let stage = normalize_stage(&dir, 64 * 1024);
    let extracted = dir
        .path()
        .join("normalize")
        .join(NormalizeStorage::EXTRACTED_FOLDER);
    fs::write(extracted.join("crm.users.jsonl"), "{\"id\":1}\n").unwrap();
    fs::write(extracted.join(".crm.users.abc.jsonl"), "{\"id\":1}\n").unwrap();
    stage
        .normalize_storage()
        .save_extracted_file("crm", "users", &[json!({"id": 2})])
        .unwrap();

    let report = stage.run(&mut BTreeMap::new()).unwrap();
    assert_eq!(report.packages.len(), 1);
    let malformed: Vec<&str> = report
        .malformed_files
        .iter()
        .map(|f| f.file_name.as_str())
        .collect();
    assert_eq!(malformed, vec![".crm.users.abc.jsonl", "crm.users.jsonl"]);
    assert!(extracted.join("crm.users.jsonl").is_file());
    assert!(extracted.join(".crm.users.abc.jsonl").is_file());
}

#[cfg(unix)]
#[test]
fn non_utf8_names_are_reported_as_malformed() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = TempDir::new().unwrap();
    let stage = normalize_stage(&dir, 64 * 1024);
    let extracted = dir
        .path()
        .join("normalize")
        .join(NormalizeStorage::EXTRACTED_FOLDER);
    let raw = extracted.join(OsStr::from_bytes(b"crm.users.\xff.jsonl"));
    if fs::write(&raw, "{\"id\":1}\n").is_err() {
        return;
    }

    let report = stage.run(&mut BTreeMap::new()).unwrap();
    assert!(report.packages.is_empty());
    assert_eq!(report.malformed_files.len(), 1);
    assert_eq!(report.malformed_files[0].file_name, "crm.users.\u{FFFD}.jsonl");
    assert!(report.malformed_files[0].reason.contains("UTF-8"));
    assert!(raw.is_file());
}

#[test]
fn non_object_records_fail_the_file() {
    let dir = TempDir::new().unwrap();
    let stage = normalize_stage(&dir, 64 * 1024);
    let bad = stage
        .normalize_storage()
        .save_extracted_file("crm", "users", &[json!([1, 2, 3])])
        .unwrap();

    let report = stage.run(&mut BTreeMap::new()).unwrap();
    assert!(report.packages.is_empty());
    assert_eq!(report.failed_files[0].file_name, bad);
    assert!(stage
        .load_storage()
        .list_normalized_packages()
        .unwrap()
        .is_empty());
}

fn text_limited(format: LoaderFileFormat, max: usize, in_bytes: bool) -> DestinationCapabilities {
    let mut caps = dummy_capabilities();
    caps.preferred_loader_file_format = format;
    caps.max_text_data_type_length = max;
    caps.is_max_text_data_type_length_in_bytes = in_bytes;
    caps
}

#[test]
fn nested_text_values_are_checked() {
    for format in [LoaderFileFormat::Jsonl, LoaderFileFormat::InsertValues] {
        let dir = TempDir::new().unwrap();
        let stage = normalize_stage_with(&dir, text_limited(format, 16, true));
        assert_eq!(stage.file_format(), format);
        let staging = stage.normalize_storage();
        let long = "x".repeat(20);
        staging
            .save_extracted_file("crm", "users", &[json!({"id": 1, "name": "short"})])
            .unwrap();
        let in_object = staging
            .save_extracted_file("crm", "users", &[json!({"id": 2, "meta": {"k": long}})])
            .unwrap();
        let in_array = staging
            .save_extracted_file("crm", "users", &[json!({"id": 3, "tags": [long]})])
            .unwrap();

        let report = stage.run(&mut BTreeMap::new()).unwrap();

        assert_eq!(report.job_count(), 1, "{}", format);
        let mut failed: Vec<&str> = report
            .failed_files
            .iter()
            .map(|f| f.file_name.as_str())
            .collect();
        failed.sort_unstable();
        let mut expected = vec![in_object.as_str(), in_array.as_str()];
        expected.sort_unstable();
        assert_eq!(failed, expected);
        for skipped in &report.failed_files {
            assert!(skipped.reason.contains("text value"), "{}", skipped.reason);
        }
    }
}

#[test]
fn text_limit_unit_follows_capabilities() {
    // `["é"]` is 5 characters but 6 bytes
    let records = [
        ("ok", json!({"id": 1, "name": "ééééé"})),
        ("long_string", json!({"id": 2, "name": "éééééé"})),
        ("small_array", json!({"id": 3, "tags": ["é"]})),
        ("long_array", json!({"id": 4, "tags": ["éé"]})),
    ];

    for (in_bytes, rejected) in [
        (false, vec!["long_string", "long_array"]),
        (true, vec!["ok", "long_string", "small_array", "long_array"]),
    ] {
        let dir = TempDir::new().unwrap();
        let stage =
            normalize_stage_with(&dir, text_limited(LoaderFileFormat::InsertValues, 5, in_bytes));
        let staging = stage.normalize_storage();
        let mut names = BTreeMap::new();
        for (label, record) in &records {
            let file = staging
                .save_extracted_file("crm", label, std::slice::from_ref(record))
                .unwrap();
            names.insert(file, *label);
        }

        let report = stage.run(&mut BTreeMap::new()).unwrap();

        let mut failed: Vec<&str> = report
            .failed_files
            .iter()
            .map(|f| names[&f.file_name])
            .collect();
        failed.sort_unstable();
        let mut expected = rejected.clone();
        expected.sort_unstable();
        assert_eq!(failed, expected, "in_bytes = {}", in_bytes);
        assert_eq!(report.job_count(), records.len() - rejected.len());
    }
}
