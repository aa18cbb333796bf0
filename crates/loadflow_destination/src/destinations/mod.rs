//! Built-in destinations.

pub mod dummy;
pub mod filesystem;

pub use dummy::{DummyBehavior, DummyClient, DummyDestination, DummyLedger};
pub use filesystem::{FilesystemClient, FilesystemDestination};
