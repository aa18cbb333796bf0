//! What a destination accepts.
//!
//! Capabilities are declared once per destination and never change. The
//! normalize stage reads them to pick a file format and to check that every
//! identifier, statement and text value it generates fits the destination.

use loadflow_protocol::LoaderFileFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{DestinationError, Result};

/// Immutable description of a destination's formats and size limits.
///
/// Has no `Default`. Every destination states its own limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationCapabilities {
    pub preferred_loader_file_format: LoaderFileFormat,
    pub supported_loader_file_formats: Vec<LoaderFileFormat>,
    /// Max length of table and dataset identifiers, in characters.
    pub max_identifier_length: usize,
    /// Max length of column identifiers, in characters.
    pub max_column_identifier_length: usize,
    pub max_query_length: usize,
    pub is_max_query_length_in_bytes: bool,
    pub max_text_data_type_length: usize,
    pub is_max_text_data_type_length_in_bytes: bool,
    pub supports_transactions: bool,
}

impl DestinationCapabilities {
    /// Reject declarations that could never negotiate.
    pub fn validate(&self) -> Result<()> {
        if self.supported_loader_file_formats.is_empty() {
            return Err(DestinationError::invalid_capabilities(
                "no supported loader file formats",
            ));
        }
        if !self
            .supported_loader_file_formats
            .contains(&self.preferred_loader_file_format)
        {
            return Err(DestinationError::invalid_capabilities(format!(
                "preferred format {} is not supported",
                self.preferred_loader_file_format
            )));
        }
        Ok(())
    }

    pub fn supports_format(&self, format: LoaderFileFormat) -> bool {
        self.supported_loader_file_formats.contains(&format)
    }

    /// Pick the file format the normalizer writes for this destination.
    ///
    /// The preferred format wins when it can be produced; otherwise the first
    /// supported format that can be produced. No overlap is a configuration
    /// error.
    pub fn negotiate_file_format(
        &self,
        producible: &[LoaderFileFormat],
    ) -> Result<LoaderFileFormat> {
        if producible.contains(&self.preferred_loader_file_format)
            && self.supports_format(self.preferred_loader_file_format)
        {
            return Ok(self.preferred_loader_file_format);
        }
        self.supported_loader_file_formats
            .iter()
            .copied()
            .find(|format| producible.contains(format))
            .ok_or_else(|| DestinationError::NoViableFormat {
                producible: producible.to_vec(),
                supported: self.supported_loader_file_formats.clone(),
            })
    }

    pub fn check_identifier(&self, identifier: &str) -> std::result::Result<(), LimitError> {
        check_length(
            LimitKind::Identifier,
            identifier,
            self.max_identifier_length,
            LengthUnit::Chars,
        )
    }

    pub fn check_column_identifier(&self, identifier: &str) -> std::result::Result<(), LimitError> {
        check_length(
            LimitKind::ColumnIdentifier,
            identifier,
            self.max_column_identifier_length,
            LengthUnit::Chars,
        )
    }

    pub fn check_query(&self, query: &str) -> std::result::Result<(), LimitError> {
        check_length(
            LimitKind::Query,
            query,
            self.max_query_length,
            LengthUnit::from_flag(self.is_max_query_length_in_bytes),
        )
    }

    pub fn check_text(&self, text: &str) -> std::result::Result<(), LimitError> {
        check_length(
            LimitKind::Text,
            text,
            self.max_text_data_type_length,
            LengthUnit::from_flag(self.is_max_text_data_type_length_in_bytes),
        )
    }

    /// Length of `query` in the unit `max_query_length` is declared in.
    pub fn query_length(&self, query: &str) -> usize {
        LengthUnit::from_flag(self.is_max_query_length_in_bytes).measure(query)
    }
}

// ============================================================================
// Limits
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Identifier,
    ColumnIdentifier,
    Query,
    Text,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::Identifier => "identifier",
            LimitKind::ColumnIdentifier => "column identifier",
            LimitKind::Query => "query",
            LimitKind::Text => "text value",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Bytes,
    Chars,
}

impl LengthUnit {
    fn from_flag(in_bytes: bool) -> Self {
        if in_bytes {
            LengthUnit::Bytes
        } else {
            LengthUnit::Chars
        }
    }

    pub fn measure(&self, value: &str) -> usize {
        match self {
            LengthUnit::Bytes => value.len(),
            LengthUnit::Chars => value.chars().count(),
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthUnit::Bytes => write!(f, "bytes"),
            LengthUnit::Chars => write!(f, "characters"),
        }
    }
}

/// A generated value exceeds a declared limit. Values are never truncated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} '{preview}' is {length} {unit} long, limit is {max}")]
pub struct LimitError {
    pub kind: LimitKind,
    /// Start of the offending value, for reporting.
    pub preview: String,
    pub length: usize,
    pub max: usize,
    pub unit: LengthUnit,
}

const PREVIEW_CHARS: usize = 32;

fn check_length(
    kind: LimitKind,
    value: &str,
    max: usize,
    unit: LengthUnit,
) -> std::result::Result<(), LimitError> {
    let length = unit.measure(value);
    if length <= max {
        return Ok(());
    }
    let mut preview: String = value.chars().take(PREVIEW_CHARS).collect();
    if value.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    Err(LimitError {
        kind,
        preview,
        length,
        max,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadflow_protocol::LoaderFileFormat::*;

    fn caps(
        preferred: LoaderFileFormat,
        supported: Vec<LoaderFileFormat>,
    ) -> DestinationCapabilities {
        DestinationCapabilities {
            preferred_loader_file_format: preferred,
            supported_loader_file_formats: supported,
            max_identifier_length: 8,
            max_column_identifier_length: 4,
            max_query_length: 10,
            is_max_query_length_in_bytes: true,
            max_text_data_type_length: 3,
            is_max_text_data_type_length_in_bytes: false,
            supports_transactions: false,
        }
    }

    #[test]
    fn test_negotiate_prefers_preferred() {
        let caps = caps(InsertValues, vec![Jsonl, InsertValues]);
        assert_eq!(
            caps.negotiate_file_format(&[Jsonl, InsertValues]).unwrap(),
            InsertValues
        );
    }

    #[test]
    fn test_negotiate_falls_back_to_supported_order() {
        let caps = caps(InsertValues, vec![Csv, Jsonl, InsertValues]);
        assert_eq!(caps.negotiate_file_format(&[Jsonl, Csv]).unwrap(), Csv);
    }

    #[test]
    fn test_negotiate_no_viable_format() {
        let caps = caps(InsertValues, vec![Jsonl, InsertValues]);
        let err = caps.negotiate_file_format(&[Csv]).unwrap_err();
        assert!(matches!(err, DestinationError::NoViableFormat { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validate() {
        assert!(caps(Jsonl, vec![Jsonl]).validate().is_ok());
        assert!(caps(Csv, vec![Jsonl]).validate().is_err());
        assert!(caps(Jsonl, vec![]).validate().is_err());
    }

    #[test]
    fn test_query_limit_counts_bytes() {
        let caps = caps(Jsonl, vec![Jsonl]);
        // 5 chars, 10 bytes
        assert!(caps.check_query("ééééé").is_ok());
        // 6 chars, 12 bytes
        let err = caps.check_query("éééééé").unwrap_err();
        assert_eq!(err.kind, LimitKind::Query);
        assert_eq!(err.length, 12);
        assert_eq!(err.unit, LengthUnit::Bytes);
    }

    #[test]
    fn test_text_limit_counts_chars() {
        let caps = caps(Jsonl, vec![Jsonl]);
        assert!(caps.check_text("ééé").is_ok());
        assert!(caps.check_text("abcd").is_err());
    }

    #[test]
    fn test_identifier_limits() {
        let caps = caps(Jsonl, vec![Jsonl]);
        assert!(caps.check_identifier("users").is_ok());
        assert!(caps.check_identifier("users_archive").is_err());
        let err = caps.check_column_identifier("email").unwrap_err();
        assert_eq!(err.kind, LimitKind::ColumnIdentifier);
        assert_eq!(
            err.to_string(),
            "column identifier 'email' is 5 characters long, limit is 4"
        );
    }
}
