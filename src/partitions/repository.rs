//! Partition repository implementation.

use crate::error::{Result, SyncError};
use crate::queue::{QueuedOperation, ReplayTarget, SyncQueue};
use crate::remote::RemoteStore;
use crate::types::{Contact, ContactId, PartitionSnapshot, Period, WriteOutcome};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Maps periods to partition documents and applies single-partition writes.
///
/// Writes go straight to the remote store while it is online. While the
/// adapter reports offline they are handed to the sync queue and reported
/// as [`WriteOutcome::Queued`]. A failure while online is returned as is.
///
/// Direct writes also wait behind the queue: as long as older writes are
/// pending, or direct writes are paused, new writes are queued after them
/// so replay never overwrites a newer edit.
///
/// Read-modify-write cycles on one partition are serialized, so two adds
/// racing on the same month get distinct ids.
pub struct PartitionRepository {
    remote: Arc<dyn RemoteStore>,
    queue: Arc<SyncQueue>,
    /// Per-partition write locks.
    partition_locks: Mutex<HashMap<Period, Arc<Mutex<()>>>>,
    /// Cleared between an Online -> Offline transition and the replay that
    /// follows reconnection.
    direct_writes: AtomicBool,
}

impl PartitionRepository {
    pub fn new(remote: Arc<dyn RemoteStore>, queue: Arc<SyncQueue>) -> Self {
        Self {
            remote,
            queue,
            partition_locks: Mutex::new(HashMap::new()),
            direct_writes: AtomicBool::new(true),
        }
    }

    /// The queue deferred writes go to.
    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Whether the remote adapter currently reports itself reachable.
    pub fn is_online(&self) -> bool {
        self.remote.is_online()
    }

    /// Whether a write issued now would go straight to the remote store.
    ///
    /// False while offline, while direct writes are paused, and while older
    /// writes are still queued.
    pub fn accepts_direct_writes(&self) -> bool {
        self.direct_writes.load(Ordering::Acquire)
            && self.remote.is_online()
            && !self.queue.has_pending()
    }

    /// Queue every write until [`resume_direct_writes`](Self::resume_direct_writes).
    pub fn pause_direct_writes(&self) {
        self.direct_writes.store(false, Ordering::Release);
    }

    /// Let writes reach the remote store again once the queue is drained.
    pub fn resume_direct_writes(&self) {
        self.direct_writes.store(true, Ordering::Release);
    }

    /// Fetch a partition. A partition that was never written reads as empty.
    pub fn load(&self, period: Period) -> Result<PartitionSnapshot> {
        match self.remote.load_partition(period)? {
            None => Ok(PartitionSnapshot::empty(period)),
            Some(doc) => Ok(PartitionSnapshot {
                period,
                contacts: doc.contacts,
                last_modified: doc.last_modified,
            }),
        }
    }

    /// Id the next add to `period` would receive.
    pub fn next_id(&self, period: Period) -> Result<ContactId> {
        Ok(self.load(period)?.next_id())
    }

    /// Overwrite a partition's contact list in one document write.
    pub fn replace_all(
        &self,
        period: Period,
        contacts: Vec<Contact>,
    ) -> Result<WriteOutcome<PartitionSnapshot>> {
        Self::check_membership(period, &contacts)?;
        Self::check_unique_ids(period, &contacts)?;

        let op = QueuedOperation::ReplacePartition {
            period,
            contacts: contacts.clone(),
        };
        self.write(op, |repo| repo.replace_direct(period, contacts))
    }

    /// Append a contact, assigning it the partition's next id.
    ///
    /// Returns the stored contact. When queued, the id is assigned at replay.
    pub fn add_record(&self, period: Period, contact: Contact) -> Result<WriteOutcome<Contact>> {
        Self::check_membership(period, std::slice::from_ref(&contact))?;

        let op = QueuedOperation::AddRecord {
            period,
            contact: contact.clone(),
        };
        self.write(op, |repo| repo.add_direct(period, contact))
    }

    /// Remove the contact with `id`, returning it.
    pub fn remove_record(&self, period: Period, id: ContactId) -> Result<WriteOutcome<Contact>> {
        let op = QueuedOperation::RemoveRecord { period, id };
        self.write(op, |repo| repo.remove_direct(period, id))
    }

    /// Replace the contact with the same id, keeping its list position.
    pub fn update_record(&self, period: Period, contact: Contact) -> Result<WriteOutcome<Contact>> {
        Self::check_membership(period, std::slice::from_ref(&contact))?;

        let op = QueuedOperation::UpdateRecord {
            period,
            contact: contact.clone(),
        };
        self.write(op, |repo| repo.update_direct(period, contact))
    }

    /// Write-behind policy shared by every mutation.
    fn write<T>(
        &self,
        op: QueuedOperation,
        direct: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<WriteOutcome<T>> {
        let _order = self.queue.write_order();
        if !self.accepts_direct_writes() {
            return self.defer(op);
        }

        match direct(self) {
            Ok(value) => Ok(WriteOutcome::Applied(value)),
            // Connectivity dropped mid-operation
            Err(SyncError::Remote(_)) if !self.remote.is_online() => self.defer(op),
            Err(e) => Err(e),
        }
    }

    fn defer<T>(&self, op: QueuedOperation) -> Result<WriteOutcome<T>> {
        info!(kind = ?op.kind(), period = %op.period(), "direct writes unavailable, write queued");
        self.queue.enqueue(op)?;
        Ok(WriteOutcome::Queued)
    }

    fn partition_lock(&self, period: Period) -> Arc<Mutex<()>> {
        Arc::clone(self.partition_locks.lock().entry(period).or_default())
    }

    fn replace_direct(&self, period: Period, contacts: Vec<Contact>) -> Result<PartitionSnapshot> {
        let lock = self.partition_lock(period);
        let _guard = lock.lock();

        let doc = self.remote.write_partition(period, &contacts)?;
        debug!(period = %period, total = doc.total_contacts, "partition replaced");

        Ok(PartitionSnapshot {
            period,
            contacts: doc.contacts,
            last_modified: doc.last_modified,
        })
    }

    fn add_direct(&self, period: Period, mut contact: Contact) -> Result<Contact> {
        let lock = self.partition_lock(period);
        let _guard = lock.lock();

        let mut snapshot = self.load(period)?;
        contact.id = snapshot.next_id();
        snapshot.contacts.push(contact.clone());

        self.remote.write_partition(period, &snapshot.contacts)?;
        debug!(period = %period, id = %contact.id, "contact added");

        Ok(contact)
    }

    fn remove_direct(&self, period: Period, id: ContactId) -> Result<Contact> {
        let lock = self.partition_lock(period);
        let _guard = lock.lock();

        let mut snapshot = self.load(period)?;
        let index = snapshot
            .contacts
            .iter()
            .position(|c| c.id == id)
            .ok_or(SyncError::ContactNotFound { period, id })?;
        let removed = snapshot.contacts.remove(index);

        self.remote.write_partition(period, &snapshot.contacts)?;
        debug!(period = %period, id = %id, "contact removed");

        Ok(removed)
    }

    fn update_direct(&self, period: Period, contact: Contact) -> Result<Contact> {
        let lock = self.partition_lock(period);
        let _guard = lock.lock();

        let mut snapshot = self.load(period)?;
        let slot = snapshot
            .contacts
            .iter_mut()
            .find(|c| c.id == contact.id)
            .ok_or(SyncError::ContactNotFound {
                period,
                id: contact.id,
            })?;
        *slot = contact.clone();

        self.remote.write_partition(period, &snapshot.contacts)?;
        debug!(period = %period, id = %contact.id, "contact updated");

        Ok(contact)
    }

    /// Every contact written to a partition must date inside it.
    fn check_membership(period: Period, contacts: &[Contact]) -> Result<()> {
        match contacts.iter().find(|c| !period.contains(c.date)) {
            Some(stray) => Err(SyncError::Validation(format!(
                "contact dated {} does not belong to partition {}",
                stray.date, period
            ))),
            None => Ok(()),
        }
    }

    fn check_unique_ids(period: Period, contacts: &[Contact]) -> Result<()> {
        let mut seen = HashSet::with_capacity(contacts.len());
        match contacts.iter().find(|c| !seen.insert(c.id)) {
            Some(dup) => Err(SyncError::Validation(format!(
                "duplicate contact id {} in partition {}",
                dup.id, period
            ))),
            None => Ok(()),
        }
    }
}

impl ReplayTarget for PartitionRepository {
    fn replay(&self, operation: &QueuedOperation) -> Result<()> {
        match operation.clone() {
            QueuedOperation::ReplacePartition { period, contacts } => {
                self.replace_direct(period, contacts).map(|_| ())
            }
            QueuedOperation::AddRecord { period, contact } => {
                self.add_direct(period, contact).map(|_| ())
            }
            QueuedOperation::UpdateRecord { period, contact } => {
                self.update_direct(period, contact).map(|_| ())
            }
            QueuedOperation::RemoveRecord { period, id } => {
                self.remove_direct(period, id).map(|_| ())
            }
        }
    }
}
