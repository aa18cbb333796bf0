//! Normalize stage.
//!
//! Reads extracted JSONL files, records which tables and columns appeared and
//! writes them out as load packages in the format negotiated with the
//! destination.

pub mod error;
pub mod normalize;
pub mod writers;

pub use error::{NormalizeError, Result};
pub use normalize::{Normalize, NormalizeReport, PackageSummary, SkippedFile};
pub use writers::WRITABLE_FORMATS;
