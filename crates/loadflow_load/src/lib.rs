//! Load stage.
//!
//! Drives the jobs of each normalized load package through a destination's
//! [`loadflow_destination::JobClient`]. Job state lives in the package
//! folders, so a run that stops half way is picked up by the next one:
//! files in `started_jobs` are restored, never submitted again.

pub mod error;
pub mod load;
pub mod report;
mod worker;

pub use error::{LoadError, Result};
pub use load::Load;
pub use report::{FailedJob, FailureKind, JobOutcome, LoadReport, PackageReport};
