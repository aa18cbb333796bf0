//! Destination references: what the registry hands out for a name.

use loadflow_protocol::defaults::QUALIFIED_DESTINATION_PREFIX;
use loadflow_protocol::{ConfigField, DestinationClientConfig, Schema};
use std::fmt;
use std::sync::Arc;

use crate::capabilities::DestinationCapabilities;
use crate::client::JobClient;
use crate::error::Result;

/// Capability descriptor plus client factory for one destination.
pub trait DestinationReference: Send + Sync {
    /// Bare name, e.g. `filesystem`.
    fn name(&self) -> &str;

    /// Fully qualified name. Built-ins live under `loadflow.destinations.`;
    /// third party destinations may override this with their own path.
    fn qualified_name(&self) -> String {
        format!("{}{}", QUALIFIED_DESTINATION_PREFIX, self.name())
    }

    fn capabilities(&self) -> DestinationCapabilities;

    /// Destination specific config fields, resolved under
    /// `destination__<name>` next to the base fields.
    fn config_fields(&self) -> &'static [ConfigField] {
        &[]
    }

    /// Build a client for `schema`. The client is not opened.
    fn client(&self, schema: Schema, config: DestinationClientConfig) -> Result<Arc<dyn JobClient>>;
}

impl fmt::Debug for dyn DestinationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationReference")
            .field("name", &self.name())
            .finish()
    }
}
