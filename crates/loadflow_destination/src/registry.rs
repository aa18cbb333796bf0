//! Name to destination mapping, built at startup.

use loadflow_protocol::defaults::QUALIFIED_DESTINATION_PREFIX;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::destinations::dummy::DummyDestination;
use crate::destinations::filesystem::FilesystemDestination;
use crate::error::{DestinationError, Result};
use crate::reference::DestinationReference;

/// Explicit registry of destinations.
///
/// Each reference is reachable by its bare name and by its qualified name.
/// Registering a name again replaces the earlier reference, which is how
/// tests swap in scripted destinations.
#[derive(Default, Clone)]
pub struct DestinationRegistry {
    by_name: BTreeMap<String, Arc<dyn DestinationReference>>,
    qualified: BTreeMap<String, String>,
}

impl DestinationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in destinations.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DummyDestination::new()));
        registry.register(Arc::new(FilesystemDestination::new()));
        registry
    }

    /// Add or replace a destination. Returns the replaced one.
    pub fn register(
        &mut self,
        reference: Arc<dyn DestinationReference>,
    ) -> Option<Arc<dyn DestinationReference>> {
        let name = reference.name().to_string();
        let qualified = reference.qualified_name();
        debug!(destination = %name, qualified = %qualified, "Registering destination");

        let previous = self.by_name.insert(name.clone(), reference);
        if let Some(previous) = &previous {
            let old_qualified = previous.qualified_name();
            if old_qualified != qualified {
                self.qualified.remove(&old_qualified);
            }
        }
        self.qualified.insert(qualified, name);
        previous
    }

    /// Resolve a bare or qualified name.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn DestinationReference>> {
        let name = if let Some(name) = self.qualified.get(identifier) {
            name.as_str()
        } else if let Some(stripped) = identifier.strip_prefix(QUALIFIED_DESTINATION_PREFIX) {
            stripped
        } else {
            identifier
        };
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| DestinationError::UnknownDestination {
                name: identifier.to_string(),
                known: self.names(),
            })
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_ok()
    }

    /// Registered bare names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }
}

impl fmt::Debug for DestinationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationRegistry")
            .field("destinations", &self.names())
            .finish()
    }
}
