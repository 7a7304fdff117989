//! Moving a contact between partitions when its date changes month.
//!
//! The remote store has no cross-document transaction, so a move is two
//! writes: add to the destination, then remove from the source. If the
//! removal fails the destination copy is removed again (best effort). A
//! failed compensation leaves the contact in both partitions and is
//! reported as [`SyncError::RollbackIncomplete`]; it is never retried
//! automatically since that could duplicate the contact.

use crate::error::{Result, SyncError};
use crate::partitions::PartitionRepository;
use crate::types::{Contact, ContactId, Period, WriteOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful migration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The contact now lives in the destination under `contact.id`.
    Moved { contact: Contact },
    /// Offline: the add and the remove were queued in that order.
    Queued,
}

impl MigrationOutcome {
    /// Id the contact received in the destination, when the move applied.
    pub fn new_id(&self) -> Option<ContactId> {
        match self {
            MigrationOutcome::Moved { contact } => Some(contact.id),
            MigrationOutcome::Queued => None,
        }
    }
}

/// Orchestrates remove-from-one, add-to-another moves.
pub struct MigrationCoordinator {
    repository: Arc<PartitionRepository>,
}

impl MigrationCoordinator {
    /// Coordinator writing through `repository`.
    pub fn new(repository: Arc<PartitionRepository>) -> Self {
        Self { repository }
    }

    /// Move `record` (identified by its current id in `from`) into `to`.
    ///
    /// The destination assigns a fresh partition-local id; every other
    /// field is kept. `record.date` must already fall inside `to`.
    /// Same-period "moves" are rejected: use an update instead.
    pub fn migrate(&self, record: &Contact, from: Period, to: Period) -> Result<MigrationOutcome> {
        if from == to {
            return Err(SyncError::SamePartition(from));
        }
        if !to.contains(record.date) {
            return Err(SyncError::Validation(format!(
                "contact dated {} cannot move into {}",
                record.date, to
            )));
        }

        // Queued moves are checked at replay instead.
        if self.repository.accepts_direct_writes() {
            self.check_source(record.id, from, to)?;
        }
        debug!(from = %from, to = %to, id = %record.id, "migrating contact");

        // Phase 1: add to destination. Nothing has changed if this fails.
        let added = match self.repository.add_record(to, record.clone()) {
            Ok(outcome) => outcome,
            Err(e) => return Err(Self::failed(from, to, &e)),
        };

        // Phase 2: remove from source.
        let removal = self.repository.remove_record(from, record.id);

        match (added, removal) {
            (WriteOutcome::Applied(contact), Ok(_)) => {
                info!(from = %from, to = %to, old_id = %record.id, new_id = %contact.id, "contact migrated");
                Ok(MigrationOutcome::Moved { contact })
            }
            (WriteOutcome::Queued, Ok(_)) => {
                info!(from = %from, to = %to, id = %record.id, "migration queued");
                Ok(MigrationOutcome::Queued)
            }
            (WriteOutcome::Applied(contact), Err(e)) => Err(self.roll_back(from, to, contact.id, e)),
            (WriteOutcome::Queued, Err(e)) => {
                // The queued add will still land; nothing here can undo it.
                warn!(from = %from, to = %to, error = %e, "source removal failed after queued add");
                Err(SyncError::RollbackIncomplete {
                    from,
                    to,
                    orphan: None,
                    reason: format!("add to {} is queued but removal failed: {}", to, e),
                })
            }
        }
    }

    /// Compensate a completed add after the source removal failed.
    fn roll_back(&self, from: Period, to: Period, orphan: ContactId, cause: SyncError) -> SyncError {
        warn!(from = %from, to = %to, orphan = %orphan, error = %cause, "source removal failed, rolling back");

        match self.repository.remove_record(to, orphan) {
            Ok(WriteOutcome::Applied(_)) => Self::failed(from, to, &cause),
            Ok(WriteOutcome::Queued) => SyncError::RollbackIncomplete {
                from,
                to,
                orphan: Some(orphan),
                reason: format!("{}; rollback queued until reconnect", cause),
            },
            Err(rollback_err) => {
                warn!(orphan = %orphan, error = %rollback_err, "rollback failed");
                SyncError::RollbackIncomplete {
                    from,
                    to,
                    orphan: Some(orphan),
                    reason: format!("{}; rollback failed: {}", cause, rollback_err),
                }
            }
        }
    }

    fn check_source(&self, id: ContactId, from: Period, to: Period) -> Result<()> {
        let source = self
            .repository
            .load(from)
            .map_err(|e| Self::failed(from, to, &e))?;
        if source.find(id).is_none() {
            return Err(SyncError::ContactNotFound { period: from, id });
        }
        Ok(())
    }

    fn failed(from: Period, to: Period, cause: &SyncError) -> SyncError {
        SyncError::MigrationFailed {
            from,
            to,
            reason: cause.to_string(),
        }
    }
}
