//! Canonical default values shared across stages.

pub const DEFAULT_LOAD_WORKERS: usize = 20;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_DESTINATION: &str = "filesystem";
pub const EXTRACTED_FILE_EXTENSION: &str = "jsonl";
pub const QUALIFIED_DESTINATION_PREFIX: &str = "loadflow.destinations.";
