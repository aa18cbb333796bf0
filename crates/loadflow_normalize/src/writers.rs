//! Job file writers for the formats the normalizer can produce.

use loadflow_destination::{DestinationCapabilities, LimitError};
use loadflow_protocol::LoaderFileFormat;
use serde_json::Value;
use std::borrow::Cow;

/// Formats this crate has a writer for.
pub const WRITABLE_FORMATS: [LoaderFileFormat; 2] =
    [LoaderFileFormat::Jsonl, LoaderFileFormat::InsertValues];

pub fn can_write(format: LoaderFileFormat) -> bool {
    WRITABLE_FORMATS.contains(&format)
}

/// Render `records` of one table in `format`.
///
/// `columns` fixes the column order for tabular formats. Callers check that
/// `format` is writable.
pub fn write_job_file(
    format: LoaderFileFormat,
    table_name: &str,
    columns: &[String],
    records: &[Value],
    capabilities: &DestinationCapabilities,
) -> Result<String, LimitError> {
    match format {
        LoaderFileFormat::InsertValues => {
            write_insert_values(table_name, columns, records, capabilities)
        }
        _ => Ok(write_jsonl(records)),
    }
}

pub fn write_jsonl(records: &[Value]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}

/// `INSERT ... VALUES` statements, split so that none exceeds
/// `max_query_length`. A single row that cannot fit is a limit error.
pub fn write_insert_values(
    table_name: &str,
    columns: &[String],
    records: &[Value],
    capabilities: &DestinationCapabilities,
) -> Result<String, LimitError> {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(",");
    let header = format!(
        "INSERT INTO {}({}) VALUES\n",
        quote_identifier(table_name),
        column_list
    );
    let header_len = capabilities.query_length(&header);
    let separator_len = capabilities.query_length(",\n");
    let terminator_len = capabilities.query_length(";");

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for record in records {
        let row = render_row(columns, record);
        let row_len = capabilities.query_length(&row);

        if !current.is_empty() {
            let extended = current_len + separator_len + row_len + terminator_len;
            if extended <= capabilities.max_query_length {
                current.push_str(",\n");
                current.push_str(&row);
                current_len += separator_len + row_len;
                continue;
            }
            current.push(';');
            statements.push(std::mem::take(&mut current));
        }

        // A statement holding just this row must fit
        capabilities.check_query(&format!("{}{};", header, row))?;
        current.push_str(&header);
        current.push_str(&row);
        current_len = header_len + row_len;
    }

    if !current.is_empty() {
        current.push(';');
        statements.push(current);
    }

    let mut out = statements.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// Text a column value occupies at the destination. Objects and arrays are
/// stored as their JSON serialization.
pub fn text_value(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(text) => Some(Cow::Borrowed(text.as_str())),
        Value::Array(_) | Value::Object(_) => Some(Cow::Owned(value.to_string())),
        _ => None,
    }
}

fn render_row(columns: &[String], record: &Value) -> String {
    let values = columns
        .iter()
        .map(|c| render_value(record.get(c).unwrap_or(&Value::Null)))
        .collect::<Vec<_>>()
        .join(",");
    format!("({})", values)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        text => quote_literal(&text_value(text).unwrap_or_default()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
