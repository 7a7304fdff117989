//! Durable queue of writes deferred while the remote store is unreachable.
//!
//! Entries are persisted to local storage on every change so a crash does
//! not lose queued writes. Replay is strictly FIFO; an entry is removed only
//! after it has been applied remotely. Delivery is at-least-once: if a write
//! lands remotely but the removal can't be persisted, the next replay
//! applies it again (a replayed `AddRecord` can then duplicate a contact).

use crate::error::{Result, SyncError};
use crate::local::LocalStore;
use crate::types::{Contact, ContactId, Period, Timestamp};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind tag of a queued operation (wire name is the variant name).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    ReplacePartition,
    AddRecord,
    UpdateRecord,
    RemoveRecord,
}

/// A write that can be replayed against the partition repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueuedOperation {
    /// Overwrite a partition's whole contact list.
    ReplacePartition { period: Period, contacts: Vec<Contact> },
    /// Append a contact (the id is assigned at replay time).
    AddRecord { period: Period, contact: Contact },
    /// Replace the contact with the same id.
    UpdateRecord { period: Period, contact: Contact },
    /// Remove the contact with this id.
    RemoveRecord { period: Period, id: ContactId },
}

impl QueuedOperation {
    /// Wire tag of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            QueuedOperation::ReplacePartition { .. } => OperationKind::ReplacePartition,
            QueuedOperation::AddRecord { .. } => OperationKind::AddRecord,
            QueuedOperation::UpdateRecord { .. } => OperationKind::UpdateRecord,
            QueuedOperation::RemoveRecord { .. } => OperationKind::RemoveRecord,
        }
    }

    /// Partition the operation writes to.
    pub fn period(&self) -> Period {
        match self {
            QueuedOperation::ReplacePartition { period, .. }
            | QueuedOperation::AddRecord { period, .. }
            | QueuedOperation::UpdateRecord { period, .. }
            | QueuedOperation::RemoveRecord { period, .. } => *period,
        }
    }
}

/// A single queue entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEntry", into = "WireEntry")]
pub struct QueueEntry {
    pub operation: QueuedOperation,
    /// When the entry was queued.
    pub enqueued_at: Timestamp,
}

/// Persisted shape: `{operationKind, payload, enqueuedAt}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry {
    operation_kind: OperationKind,
    payload: WirePayload,
    enqueued_at: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WirePayload {
    year: i32,
    month: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contacts: Option<Vec<Contact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contact: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<ContactId>,
}

impl From<QueueEntry> for WireEntry {
    fn from(entry: QueueEntry) -> Self {
        let operation_kind = entry.operation.kind();
        let period = entry.operation.period();
        let mut payload = WirePayload {
            year: period.year(),
            month: period.month(),
            contacts: None,
            contact: None,
            id: None,
        };
        match entry.operation {
            QueuedOperation::ReplacePartition { contacts, .. } => payload.contacts = Some(contacts),
            QueuedOperation::AddRecord { contact, .. }
            | QueuedOperation::UpdateRecord { contact, .. } => payload.contact = Some(contact),
            QueuedOperation::RemoveRecord { id, .. } => payload.id = Some(id),
        }
        WireEntry {
            operation_kind,
            payload,
            enqueued_at: entry.enqueued_at,
        }
    }
}

impl TryFrom<WireEntry> for QueueEntry {
    type Error = SyncError;

    fn try_from(wire: WireEntry) -> Result<Self> {
        let kind = wire.operation_kind;
        let period = Period::new(wire.payload.year, wire.payload.month)?;
        let missing = |field: &str| {
            SyncError::Deserialization(format!("{:?} entry is missing payload.{}", kind, field))
        };
        let operation = match kind {
            OperationKind::ReplacePartition => QueuedOperation::ReplacePartition {
                period,
                contacts: wire.payload.contacts.ok_or_else(|| missing("contacts"))?,
            },
            OperationKind::AddRecord => QueuedOperation::AddRecord {
                period,
                contact: wire.payload.contact.ok_or_else(|| missing("contact"))?,
            },
            OperationKind::UpdateRecord => QueuedOperation::UpdateRecord {
                period,
                contact: wire.payload.contact.ok_or_else(|| missing("contact"))?,
            },
            OperationKind::RemoveRecord => QueuedOperation::RemoveRecord {
                period,
                id: wire.payload.id.ok_or_else(|| missing("id"))?,
            },
        };
        Ok(QueueEntry {
            operation,
            enqueued_at: wire.enqueued_at,
        })
    }
}

/// Something queued operations can be replayed against.
pub trait ReplayTarget {
    /// Apply one operation directly against the remote store.
    ///
    /// Must not enqueue on failure; the queue keeps the entry itself.
    fn replay(&self, operation: &QueuedOperation) -> Result<()>;
}

/// Outcome of one replay pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries applied and removed.
    pub replayed: usize,
    /// Entries that failed and stay queued for the next replay.
    pub retained: usize,
    /// Entries discarded because their target contact no longer exists.
    pub dropped: usize,
    /// Failure messages for retained and dropped entries, in queue order.
    pub errors: Vec<String>,
}

impl ReplayReport {
    /// True when nothing was left behind for a later replay.
    pub fn is_complete(&self) -> bool {
        self.retained == 0
    }
}

/// Durable FIFO of deferred writes.
pub struct SyncQueue {
    storage: Arc<dyn LocalStore>,
    key: String,
    entries: Mutex<Vec<QueueEntry>>,
    /// Held exclusively by a replay pass and shared by direct writes, so a
    /// direct write never lands in the middle of a replay.
    replay_lock: RwLock<()>,
}

impl SyncQueue {
    /// Open the queue stored under `key`, reading back any persisted entries.
    ///
    /// An unreadable queue document is moved to `<key>.corrupt` and the
    /// queue starts empty.
    pub fn open(storage: Arc<dyn LocalStore>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();

        let entries = match storage.get(&key)? {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(key = %key, error = %e, "sync queue unreadable, starting empty");
                    storage.set(&format!("{}.corrupt", key), &raw)?;
                    storage.remove(&key)?;
                    Vec::new()
                }
            },
        };

        if !entries.is_empty() {
            info!(pending = entries.len(), "loaded pending sync queue");
        }

        Ok(Self {
            storage,
            key,
            entries: Mutex::new(entries),
            replay_lock: RwLock::new(()),
        })
    }

    /// Append an operation and persist the queue before returning.
    pub fn enqueue(&self, operation: QueuedOperation) -> Result<()> {
        let mut entries = self.entries.lock();
        debug!(kind = ?operation.kind(), period = %operation.period(), "queueing write");
        entries.push(QueueEntry {
            operation,
            enqueued_at: Timestamp::now(),
        });

        if let Err(e) = self.persist(&entries) {
            // Not durable, so don't report it as queued.
            entries.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot of pending entries in replay order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().clone()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is waiting to be replayed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True when at least one write is waiting to be replayed.
    pub fn has_pending(&self) -> bool {
        !self.is_empty()
    }

    /// Shared guard held by a direct write while it decides whether to
    /// queue and while it runs. Blocks while a replay pass is running.
    pub(crate) fn write_order(&self) -> RwLockReadGuard<'_, ()> {
        self.replay_lock.read()
    }

    /// Replay every pending entry in enqueue order.
    ///
    /// A failing entry stays in place and replay continues with the next
    /// one. Entries whose target contact is gone are dropped, since
    /// retrying them can never succeed.
    pub fn replay_all(&self, target: &dyn ReplayTarget) -> Result<ReplayReport> {
        let _replay = self.replay_lock.write();
        let pending = self.entries();
        let mut report = ReplayReport::default();

        if pending.is_empty() {
            return Ok(report);
        }
        info!(pending = pending.len(), "replaying sync queue");

        // Entries only leave the queue here, and new ones are appended, so
        // the unresolved entry we are looking at always sits at `cursor`.
        let mut cursor = 0;
        for entry in pending {
            match target.replay(&entry.operation) {
                Ok(()) => {
                    self.remove_at(cursor)?;
                    report.replayed += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!(kind = ?entry.operation.kind(), error = %e, "dropping queued write");
                    self.remove_at(cursor)?;
                    report.dropped += 1;
                    report.errors.push(e.to_string());
                }
                Err(e) => {
                    warn!(kind = ?entry.operation.kind(), error = %e, "queued write failed, retaining");
                    cursor += 1;
                    report.retained += 1;
                    report.errors.push(e.to_string());
                }
            }
        }

        info!(
            replayed = report.replayed,
            retained = report.retained,
            dropped = report.dropped,
            "sync queue replay finished"
        );
        Ok(report)
    }

    /// Drop every pending entry.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries)
    }

    fn remove_at(&self, index: usize) -> Result<()> {
        let mut entries = self.entries.lock();
        if index < entries.len() {
            entries.remove(index);
        }
        self.persist(&entries)
    }

    fn persist(&self, entries: &[QueueEntry]) -> Result<()> {
        if entries.is_empty() {
            return self.storage.remove(&self.key);
        }
        let encoded = serde_json::to_string(entries)?;
        self.storage.set(&self.key, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use chrono::NaiveDate;
    use parking_lot::Mutex as PlMutex;

    fn jan() -> Period {
        Period::new(2025, 1).unwrap()
    }

    fn contact(name: &str) -> Contact {
        Contact::new("A", name, NaiveDate::from_ymd_opt(2025, 1, 5).unwrap())
    }

    /// Records applied operations; fails any whose period is in `failing`.
    #[derive(Default)]
    struct Recorder {
        applied: PlMutex<Vec<QueuedOperation>>,
        failing: PlMutex<Vec<Period>>,
        missing: PlMutex<Vec<ContactId>>,
    }

    impl ReplayTarget for Recorder {
        fn replay(&self, operation: &QueuedOperation) -> Result<()> {
            if self.failing.lock().contains(&operation.period()) {
                return Err(SyncError::Remote(crate::error::RemoteError::Unreachable));
            }
            if let QueuedOperation::RemoveRecord { period, id } = operation {
                if self.missing.lock().contains(id) {
                    return Err(SyncError::ContactNotFound {
                        period: *period,
                        id: *id,
                    });
                }
            }
            self.applied.lock().push(operation.clone());
            Ok(())
        }
    }

    #[test]
    fn test_wire_format() {
        let entry = QueueEntry {
            operation: QueuedOperation::RemoveRecord {
                period: jan(),
                id: ContactId(7),
            },
            enqueued_at: Timestamp(1_700_000_000_000),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["operationKind"], "RemoveRecord");
        assert_eq!(json["payload"]["year"], 2025);
        assert_eq!(json["payload"]["month"], 1);
        assert_eq!(json["payload"]["id"], 7);
        assert_eq!(json["enqueuedAt"], 1_700_000_000_000i64);

        let back: QueueEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_payload_missing_field_rejected() {
        let raw = r#"{"operationKind":"AddRecord","payload":{"year":2025,"month":1},"enqueuedAt":1}"#;
        assert!(serde_json::from_str::<QueueEntry>(raw).is_err());
    }

    #[test]
    fn test_enqueue_persists_immediately() {
        let storage = Arc::new(MemoryLocalStore::new());
        let queue = SyncQueue::open(storage.clone(), "q").unwrap();
        queue
            .enqueue(QueuedOperation::AddRecord {
                period: jan(),
                contact: contact("X"),
            })
            .unwrap();

        let raw = storage.get("q").unwrap().unwrap();
        let persisted: Vec<QueueEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.len(), 1);

        // Reopen sees the same entry
        let reopened = SyncQueue::open(storage, "q").unwrap();
        assert_eq!(reopened.entries(), queue.entries());
    }

    #[test]
    fn test_replay_is_fifo() {
        let queue = SyncQueue::open(Arc::new(MemoryLocalStore::new()), "q").unwrap();
        let first = QueuedOperation::UpdateRecord {
            period: jan(),
            contact: contact("first").with_id(ContactId(1)),
        };
        let second = QueuedOperation::UpdateRecord {
            period: jan(),
            contact: contact("second").with_id(ContactId(1)),
        };
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second.clone()).unwrap();

        let target = Recorder::default();
        let report = queue.replay_all(&target).unwrap();

        assert_eq!(report.replayed, 2);
        assert!(queue.is_empty());
        assert_eq!(*target.applied.lock(), vec![first, second]);
    }

    #[test]
    fn test_replay_retains_failures_in_order() {
        let feb = Period::new(2025, 2).unwrap();
        let queue = SyncQueue::open(Arc::new(MemoryLocalStore::new()), "q").unwrap();
        let ops = vec![
            QueuedOperation::RemoveRecord { period: jan(), id: ContactId(1) },
            QueuedOperation::RemoveRecord { period: feb, id: ContactId(2) },
            QueuedOperation::RemoveRecord { period: jan(), id: ContactId(3) },
            QueuedOperation::RemoveRecord { period: feb, id: ContactId(4) },
        ];
        for op in &ops {
            queue.enqueue(op.clone()).unwrap();
        }

        let target = Recorder::default();
        target.failing.lock().push(feb);
        let report = queue.replay_all(&target).unwrap();

        assert_eq!(report.replayed, 2);
        assert_eq!(report.retained, 2);
        assert!(!report.is_complete());
        let left: Vec<_> = queue.entries().into_iter().map(|e| e.operation).collect();
        assert_eq!(left, vec![ops[1].clone(), ops[3].clone()]);

        // Next replay once the partition recovers
        target.failing.lock().clear();
        let report = queue.replay_all(&target).unwrap();
        assert_eq!(report.replayed, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replay_drops_not_found() {
        let queue = SyncQueue::open(Arc::new(MemoryLocalStore::new()), "q").unwrap();
        queue
            .enqueue(QueuedOperation::RemoveRecord { period: jan(), id: ContactId(9) })
            .unwrap();

        let target = Recorder::default();
        target.missing.lock().push(ContactId(9));
        let report = queue.replay_all(&target).unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_corrupt_queue_is_preserved() {
        let storage = Arc::new(MemoryLocalStore::new());
        storage.set("q", "{not json").unwrap();

        let queue = SyncQueue::open(storage.clone(), "q").unwrap();
        assert!(queue.is_empty());
        assert_eq!(storage.get("q.corrupt").unwrap().as_deref(), Some("{not json"));
        assert_eq!(storage.get("q").unwrap(), None);
    }
}
