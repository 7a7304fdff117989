//! Remote store adapter boundary.
//!
//! The remote side holds one document per partition and knows nothing about
//! records beyond their list. Writes are upserts: writing a partition that
//! doesn't exist creates it.

mod memory;

pub use memory::MemoryRemoteStore;

use crate::error::RemoteError;
use crate::types::{Contact, PartitionDocument, Period};

/// A backend that stores partition documents.
pub trait RemoteStore: Send + Sync {
    /// Fetch a partition document. `Ok(None)` when it was never written.
    fn load_partition(&self, period: Period) -> Result<Option<PartitionDocument>, RemoteError>;

    /// Overwrite (or create) a partition in one document write.
    ///
    /// Returns the stored document with the server-assigned `last_modified`.
    fn write_partition(
        &self,
        period: Period,
        contacts: &[Contact],
    ) -> Result<PartitionDocument, RemoteError>;

    /// Current connectivity as seen by the adapter.
    fn is_online(&self) -> bool;
}
