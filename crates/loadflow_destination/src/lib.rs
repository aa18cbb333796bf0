//! Destination contract for the load stage.
//!
//! The orchestrator only sees the traits in this crate:
//!
//! - [`DestinationReference`]: capabilities plus a client factory, looked up
//!   by name in a [`DestinationRegistry`]
//! - [`JobClient`]: a session against one destination for one schema
//! - [`LoadJob`]: the delivery of one file
//!
//! Concrete destinations live in [`destinations`].

pub mod capabilities;
pub mod client;
pub mod destinations;
pub mod error;
pub mod job;
pub mod reference;
pub mod registry;

pub use capabilities::{DestinationCapabilities, LengthUnit, LimitError, LimitKind};
pub use client::{JobClient, JobClientSession};
pub use error::{DestinationError, Result};
pub use job::{job_file_name, EmptyLoadJob, LoadJob, TrackedJob};
pub use reference::DestinationReference;
pub use registry::DestinationRegistry;
