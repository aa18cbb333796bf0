//! Job clients: a session against one destination for one schema.

use loadflow_ids::LoadId;
use loadflow_protocol::{DestinationClientConfig, Schema, TableSchema};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capabilities::DestinationCapabilities;
use crate::error::Result;
use crate::job::LoadJob;

/// Destination side of the load stage.
///
/// Methods take `&self` so one client can be shared by all load workers;
/// implementations keep their mutable state behind locks.
pub trait JobClient: Send + Sync {
    /// Same value for every client of a destination. Needs no open session.
    fn capabilities(&self) -> &DestinationCapabilities;

    fn schema(&self) -> &Schema;

    fn config(&self) -> &DestinationClientConfig;

    /// Acquire connections or other session resources.
    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Release what [`JobClient::open`] acquired.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Create destination structures for the dataset. Idempotent.
    /// `wipe_data` drops and recreates them.
    fn initialize_storage(&self, wipe_data: bool) -> Result<()>;

    /// Bring destination tables in line with [`JobClient::schema`]. Idempotent.
    fn update_storage_schema(&self) -> Result<()>;

    /// Begin loading one file and return without waiting for completion.
    fn start_file_load(&self, table: &TableSchema, file_path: &Path) -> Result<Box<dyn LoadJob>>;

    /// Re-attach to the remote job for a file started in an earlier run.
    ///
    /// Must not submit the payload again. Fails with
    /// [`crate::DestinationError::RestoreNotFound`] when the destination
    /// knows nothing about the file.
    fn restore_file_load(&self, file_path: &Path) -> Result<Box<dyn LoadJob>>;

    /// Durably mark a package as loaded. Callers guarantee every job of the
    /// package completed.
    fn complete_load(&self, load_id: &LoadId) -> Result<()>;
}

/// Open session on a shared client. Closed on drop.
///
/// Prefer [`JobClientSession::finish`], which surfaces close errors; drop
/// only logs them.
pub struct JobClientSession {
    client: Arc<dyn JobClient>,
    open: bool,
}

impl JobClientSession {
    pub fn open(client: Arc<dyn JobClient>) -> Result<Self> {
        client.open()?;
        debug!(
            destination = %client.config().destination_name,
            schema = %client.schema().name,
            "Opened job client"
        );
        Ok(Self { client, open: true })
    }

    /// Shared handle for workers that outlive a borrow of the session.
    pub fn client(&self) -> Arc<dyn JobClient> {
        Arc::clone(&self.client)
    }

    pub fn finish(mut self) -> Result<()> {
        self.open = false;
        self.client.close()
    }
}

impl Deref for JobClientSession {
    type Target = dyn JobClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for JobClientSession {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(e) = self.client.close() {
            warn!(
                destination = %self.client.config().destination_name,
                "Failed to close job client: {}", e
            );
        }
    }
}
