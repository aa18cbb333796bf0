//! Identifier wrappers for Loadflow.
//!
//! Both identifiers end up inside file and folder names, so neither may
//! contain the `.` delimiter or a path separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

fn validate_token(value: &str, label: &str) -> Result<(), IdParseError> {
    if value.is_empty() {
        return Err(IdParseError::new(format!("Invalid {}: empty", label)));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(IdParseError::new(format!(
            "Invalid {} '{}': unexpected character '{}'",
            label, value, bad
        )));
    }
    Ok(())
}

macro_rules! define_token_id {
    ($name:ident, $label:expr) => {
        impl $name {
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                validate_token(value, $label)?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Identifier of a load package.
///
/// Generated ids are UTC microsecond timestamps, strictly increasing within
/// a process, so lexicographic order of ids is creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadId(String);

static LAST_LOAD_ID_MICROS: AtomicI64 = AtomicI64::new(0);

impl LoadId {
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_micros();
        let mut last = LAST_LOAD_ID_MICROS.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match LAST_LOAD_ID_MICROS.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Self(format!("{:016}", next)),
                Err(actual) => last = actual,
            }
        }
    }
}

impl Default for LoadId {
    fn default() -> Self {
        Self::new()
    }
}

define_token_id!(LoadId, "load ID");

/// Unique token for one staged or job file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

define_token_id!(FileId, "file ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_ids_strictly_increase() {
        let ids: Vec<LoadId> = (0..1_000).map(|_| LoadId::new()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_generated_ids_parse_back() {
        let load_id = LoadId::new();
        assert_eq!(LoadId::parse(load_id.as_str()).unwrap(), load_id);
        let file_id = FileId::new();
        assert_eq!(file_id.as_str().len(), 32);
        assert_eq!(file_id.as_str().parse::<FileId>().unwrap(), file_id);
    }

    #[test]
    fn test_ids_reject_delimiters() {
        assert!(FileId::parse("abc.def").is_err());
        assert!(FileId::parse("a/b").is_err());
        assert!(LoadId::parse("").is_err());
        assert!(FileId::parse("custom-token_1").is_ok());
    }
}
