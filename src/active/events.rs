//! Working-set events and their subscribers.

use crate::query::ContactFilter;
use crate::types::{Contact, Period, Timestamp};
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Published whenever the active working set changes.
#[derive(Clone, Debug)]
pub enum WorkingSetEvent {
    /// A load for `period` started; the previous set is about to be replaced.
    Loading { period: Period },

    /// The working set was replaced by the contents of `period`.
    Loaded {
        period: Period,
        contacts: Arc<Vec<Contact>>,
        last_modified: Option<Timestamp>,
    },

    /// Loading `period` failed; the working set is now empty.
    LoadFailed { period: Period, error: String },

    FilterChanged { filter: ContactFilter },

    /// Final event on a subscription that was removed.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The subscriber's buffer filled up.
    BufferOverflow,
    Unsubscribed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a working-set subscription.
pub struct WorkingSetSubscription {
    pub id: SubscriptionId,
    receiver: Receiver<WorkingSetEvent>,
}

impl WorkingSetSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<WorkingSetEvent, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<WorkingSetEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkingSetEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<WorkingSetEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of working-set events over bounded channels.
///
/// Publishing never blocks: a subscriber whose buffer is full is removed.
pub(crate) struct Subscribers {
    senders: RwLock<HashMap<SubscriptionId, Sender<WorkingSetEvent>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl Subscribers {
    pub(crate) fn new(buffer_size: usize) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    pub(crate) fn subscribe(&self) -> WorkingSetSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        self.senders.write().insert(id, sender);
        WorkingSetSubscription { id, receiver }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sender) = self.senders.write().remove(&id) {
            let _ = sender.try_send(WorkingSetEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub(crate) fn publish(&self, event: WorkingSetEvent) {
        let mut overflowed = Vec::new();
        let mut disconnected = Vec::new();

        {
            let senders = self.senders.read();
            for (id, sender) in senders.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => overflowed.push(*id),
                    Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
                }
            }
        }

        if overflowed.is_empty() && disconnected.is_empty() {
            return;
        }

        let mut senders = self.senders.write();
        for id in disconnected {
            senders.remove(&id);
        }
        for id in overflowed {
            if let Some(sender) = senders.remove(&id) {
                debug!(subscription = id.0, "dropping slow working-set subscriber");
                // Buffer is full, so this usually fails; that's fine.
                let _ = sender.try_send(WorkingSetEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
        }
    }
}
