//! Versioned staging storages.
//!
//! - [`NormalizeStorage`]: extracted files waiting for normalization
//! - [`LoadStorage`]: load packages and the durable state of their jobs
//!
//! Both sit on a [`VersionedStorage`] that refuses to open a root whose
//! on-disk version it cannot reach.

pub mod error;
pub mod file_storage;
pub mod load;
pub mod lock;
pub mod normalize;
pub mod versioned;

pub use error::{Result, StorageError};
pub use file_storage::FileStorage;
pub use load::{
    JobFolder, LoadStorage, PackageJobCounts, PackageStage, ParsedJobFileName,
    EXCEPTION_EXTENSION, SCHEMA_FILE_NAME,
};
pub use normalize::{NormalizeStorage, ParsedExtractedFileName, SchemaGroup, SchemaGroups};
pub use versioned::{Migration, MigrationRegistry, VersionedStorage, VERSION_FILE};
