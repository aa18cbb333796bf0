//! Canonical enums shared by the normalize and load stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Loader File Formats
// ============================================================================

/// File format of a job file handed from normalize to load.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoaderFileFormat {
    /// New line separated JSON documents
    #[serde(rename = "jsonl")]
    Jsonl,
    /// Internal extract -> normalize format based on jsonl
    #[serde(rename = "puae-jsonl")]
    PuaeJsonl,
    /// Batches of `INSERT ... VALUES` statements
    #[serde(rename = "insert_values")]
    InsertValues,
    /// Comma separated values
    #[serde(rename = "csv")]
    Csv,
}

impl LoaderFileFormat {
    pub const ALL: [LoaderFileFormat; 4] = [
        LoaderFileFormat::Jsonl,
        LoaderFileFormat::PuaeJsonl,
        LoaderFileFormat::InsertValues,
        LoaderFileFormat::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderFileFormat::Jsonl => "jsonl",
            LoaderFileFormat::PuaeJsonl => "puae-jsonl",
            LoaderFileFormat::InsertValues => "insert_values",
            LoaderFileFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for LoaderFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LoaderFileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(LoaderFileFormat::Jsonl),
            "puae-jsonl" => Ok(LoaderFileFormat::PuaeJsonl),
            "insert_values" => Ok(LoaderFileFormat::InsertValues),
            "csv" => Ok(LoaderFileFormat::Csv),
            _ => Err(format!(
                "Invalid loader file format: '{}'. Expected: jsonl, puae-jsonl, insert_values, or csv",
                s
            )),
        }
    }
}

// ============================================================================
// Load Job Status
// ============================================================================

/// Status of a single file load job.
///
/// Every job starts in `Running`. `Completed`, `Failed` and `Retry` are
/// terminal from the orchestrator's point of view: the job object is
/// discarded once one of them is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadJobStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Retry,
}

impl LoadJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadJobStatus::Running => "running",
            LoadJobStatus::Completed => "completed",
            LoadJobStatus::Failed => "failed",
            LoadJobStatus::Retry => "retry",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadJobStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LoadJobStatus::Completed)
    }
}

impl fmt::Display for LoadJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LoadJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(LoadJobStatus::Running),
            "completed" => Ok(LoadJobStatus::Completed),
            "failed" => Ok(LoadJobStatus::Failed),
            "retry" => Ok(LoadJobStatus::Retry),
            _ => Err(format!("Invalid load job status: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_parse() {
        for format in LoaderFileFormat::ALL {
            assert_eq!(format.as_str().parse::<LoaderFileFormat>().unwrap(), format);
        }
        assert!("parquet".parse::<LoaderFileFormat>().is_err());
    }

    #[test]
    fn test_file_format_serde_names() {
        let json = serde_json::to_string(&LoaderFileFormat::InsertValues).unwrap();
        assert_eq!(json, "\"insert_values\"");
        let format: LoaderFileFormat = serde_json::from_str("\"puae-jsonl\"").unwrap();
        assert_eq!(format, LoaderFileFormat::PuaeJsonl);
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!LoadJobStatus::Running.is_terminal());
        assert!(LoadJobStatus::Completed.is_terminal());
        assert!(LoadJobStatus::Failed.is_terminal());
        assert!(LoadJobStatus::Retry.is_terminal());
        assert!(LoadJobStatus::Completed.is_success());
        assert!(!LoadJobStatus::Retry.is_success());
    }
}
