//! Property tests for the file naming conventions.

use loadflow_protocol::LoaderFileFormat;
use loadflow_storage::{NormalizeStorage, ParsedJobFileName, SchemaGroup};
use proptest::prelude::*;

fn component() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,12}"
}

fn file_format() -> impl Strategy<Value = LoaderFileFormat> {
    prop::sample::select(LoaderFileFormat::ALL.to_vec())
}

proptest! {
    #[test]
    fn extracted_name_parses_back(
        schema in component(),
        table in component(),
        file_id in component()
    ) {
        let name = NormalizeStorage::build_extracted_file_name(&schema, &table, &file_id).unwrap();
        let parsed = NormalizeStorage::parse_normalize_file_name(&name).unwrap();
        prop_assert_eq!(parsed.schema_name, schema);
        prop_assert_eq!(parsed.table_name, table);
        prop_assert_eq!(parsed.file_id, file_id);
    }

    #[test]
    fn job_name_parses_back(
        table in component(),
        file_id in component(),
        retry_count in 0u32..1000,
        format in file_format(),
    ) {
        let job = ParsedJobFileName {
            table_name: table,
            file_id,
            retry_count,
            file_format: format,
        };
        let name = job.file_name().unwrap();
        prop_assert_eq!(ParsedJobFileName::parse(&name).unwrap(), job);
    }

    #[test]
    fn sorted_grouping_yields_one_group_per_schema(
        entries in prop::collection::vec((component(), component()), 0..30)
    ) {
        let mut files: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(i, (schema, table))| {
                let file_id = format!("id{}", i);
                NormalizeStorage::build_extracted_file_name(schema, table, &file_id).unwrap()
            })
            .collect();
        files.sort();

        let groups: Vec<SchemaGroup> = NormalizeStorage::group_by_schema(files.clone())
            .collect::<Result<_, _>>()
            .unwrap();

        let mut schemas: Vec<&str> = groups.iter().map(|g| g.schema_name.as_str()).collect();
        let total = schemas.len();
        schemas.dedup();
        prop_assert_eq!(schemas.len(), total);

        let flattened: Vec<String> = groups.into_iter().flat_map(|g| g.files).collect();
        prop_assert_eq!(flattened, files);
    }
}
