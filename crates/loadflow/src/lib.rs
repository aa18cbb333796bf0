//! Loadflow: staged extract, normalize and load over pluggable destinations.
//!
//! ```text
//! extract ──► normalize/extracted/<schema>.<table>.<file_id>.jsonl
//!                │ group by schema, negotiate file format
//!                ▼
//!             load/normalized/<load_id>/new_jobs/<table>.<file_id>.<retry>.<format>
//!                │ start / restore, poll, retry
//!                ▼
//!             destination  ──►  load/loaded/<load_id>/
//! ```
//!
//! [`Pipeline`] wires the stages together. The stage crates are re-exported
//! for callers that drive them directly.

pub mod config;
pub mod pipeline;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, RunReport, SCHEMAS_FOLDER};

pub use loadflow_destination as destination;
pub use loadflow_ids as ids;
pub use loadflow_load as load;
pub use loadflow_logging as logging;
pub use loadflow_normalize as normalize;
pub use loadflow_protocol as protocol;
pub use loadflow_storage as storage;

pub use loadflow_destination::{DestinationReference, DestinationRegistry};
pub use loadflow_protocol::{
    ConfigProvider, DestinationClientConfig, DictionaryProvider, EnvironmentProvider,
    LoaderConfig, NormalizeConfig, Schema,
};
