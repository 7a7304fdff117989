//! # Contact Sync
//!
//! A period-partitioned store for sales contacts with offline write-behind.
//!
//! ## Core Concepts
//!
//! - **Partitions**: One remote document per calendar month, holding that
//!   month's contacts in insertion order. Ids are local to a partition.
//! - **Sync queue**: Writes made while the remote is unreachable are kept
//!   on local disk and replayed in order on reconnect.
//! - **Migration**: Changing a contact's date to another month moves it
//!   between partitions, with a compensating rollback on partial failure.
//! - **Active period**: The month being worked on, always reloaded after
//!   the caller's own writes to it.
//!
//! ## Example
//!
//! ```ignore
//! use contact_sync::{Contact, ContactSync, MemoryRemoteStore, Period, SyncConfig};
//!
//! let remote = Arc::new(MemoryRemoteStore::new());
//! let sync = ContactSync::open(SyncConfig::at("./contacts"), remote)?;
//!
//! sync.active().set_period(Period::new(2025, 3)?)?;
//! sync.add_contact(
//!     Contact::new("Rossi", "Acme Srl", date)
//!         .with_contact_method("Phone")
//!         .with_project("RETAIL", "Shop fit-out"),
//! )?;
//!
//! let stats = sync.queries().aggregate_statistics(sync.default_range()?)?;
//! ```

pub mod active;
pub mod config;
pub mod engine;
pub mod error;
pub mod import;
pub mod local;
pub mod migration;
pub mod partitions;
pub mod query;
pub mod queue;
pub mod remote;
pub mod types;

// Re-exports
pub use active::{
    ActivePeriodController, DropReason, LoadOutcome, LoadState, LoadTicket, SubscriptionId,
    WorkingSetEvent, WorkingSetSubscription,
};
pub use config::{SyncConfig, DEFAULT_QUEUE_KEY};
pub use engine::{ContactSync, SaveOutcome};
pub use error::{RemoteError, Result, SyncError};
pub use import::{import_rows, normalize_row, ImportReport, RawRow, RejectedRow};
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use migration::{MigrationCoordinator, MigrationOutcome};
pub use partitions::PartitionRepository;
pub use query::{
    ClientType, ContactFilter, ExportedPartition, GlobalQueryService, GlobalStatistics,
    MonthlyTrend, PeriodMatch, PeriodSummary, QuickFilter, SearchCriteria, StorageStats,
    YearRange, MAX_YEAR_SPAN,
};
pub use queue::{OperationKind, QueueEntry, QueuedOperation, ReplayReport, ReplayTarget, SyncQueue};
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use types::*;
