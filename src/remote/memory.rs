//! In-process remote store with connectivity and failure injection.

use super::RemoteStore;
use crate::error::RemoteError;
use crate::types::{Contact, PartitionDocument, Period, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// Remote store kept in memory.
///
/// Used as the backend in tests and benchmarks. Connectivity can be toggled
/// and individual writes made to fail, which is how the offline queue and
/// the migration rollback paths are exercised.
pub struct MemoryRemoteStore {
    documents: RwLock<BTreeMap<Period, PartitionDocument>>,
    online: AtomicBool,
    /// Server clock; strictly increasing so every write gets a new timestamp.
    clock: AtomicI64,
    /// Injected write failures per partition: (writes to let through, failures).
    failing_writes: Mutex<HashMap<Period, (usize, usize)>>,
    latency: Mutex<Option<Duration>>,
    load_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            online: AtomicBool::new(true),
            clock: AtomicI64::new(Timestamp::now().0),
            failing_writes: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            load_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Flip connectivity. Offline stores refuse every load and write.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make the next `count` writes to `period` fail with a rejection.
    pub fn fail_writes(&self, period: Period, count: usize) {
        self.fail_writes_after(period, 0, count);
    }

    /// Let `successes` writes to `period` through, then fail the next `count`.
    pub fn fail_writes_after(&self, period: Period, successes: usize, count: usize) {
        self.failing_writes.lock().insert(period, (successes, count));
    }

    /// Delay every load and write by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Place a document directly, bypassing connectivity and failures.
    pub fn seed(&self, period: Period, contacts: Vec<Contact>) {
        let mut doc = PartitionDocument::new(period, contacts);
        doc.last_modified = Some(self.tick());
        self.documents.write().insert(period, doc);
    }

    /// Read a document directly, bypassing connectivity.
    pub fn document(&self, period: Period) -> Option<PartitionDocument> {
        self.documents.read().get(&period).cloned()
    }

    /// Number of loads served (successful or not).
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Number of writes attempted.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn tick(&self) -> Timestamp {
        Timestamp(self.clock.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
    }

    fn take_injected_failure(&self, period: Period) -> bool {
        let mut failing = self.failing_writes.lock();
        match failing.get_mut(&period) {
            Some((pass, _)) if *pass > 0 => {
                *pass -= 1;
                false
            }
            Some((_, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn load_partition(&self, period: Period) -> Result<Option<PartitionDocument>, RemoteError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency();

        if !self.is_online() {
            return Err(RemoteError::Unreachable);
        }
        Ok(self.documents.read().get(&period).cloned())
    }

    fn write_partition(
        &self,
        period: Period,
        contacts: &[Contact],
    ) -> Result<PartitionDocument, RemoteError> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency();

        if !self.is_online() {
            return Err(RemoteError::Unreachable);
        }
        if self.take_injected_failure(period) {
            return Err(RemoteError::Rejected(format!(
                "injected failure for {}",
                period.document_id()
            )));
        }

        let mut doc = PartitionDocument::new(period, contacts.to_vec());
        doc.last_modified = Some(self.tick());
        self.documents.write().insert(period, doc.clone());
        Ok(doc)
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
