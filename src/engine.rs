//! The sync engine: one handle over every component.

use crate::active::{self, ActivePeriodController};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::import::{self, ImportReport, RawRow};
use crate::local::{FileLocalStore, LocalStore};
use crate::migration::{MigrationCoordinator, MigrationOutcome};
use crate::partitions::PartitionRepository;
use crate::query::{GlobalQueryService, YearRange};
use crate::queue::{ReplayReport, SyncQueue};
use crate::remote::RemoteStore;
use crate::types::{Contact, ContactId, Period, WriteOutcome};
use chrono::Datelike;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// What `save_contact` did with an edited contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Updated in place; the date stayed in the same month.
    Updated(Contact),
    /// The date moved to another month; the contact now has a new id there.
    Moved { from: Period, contact: Contact },
    /// Offline: the change is waiting in the sync queue.
    Queued,
}

/// Period-partitioned contact storage with offline write-behind.
///
/// Ties the repository, sync queue, migration coordinator, active period
/// controller and global queries to one remote store and one local storage
/// directory. Every write that lands on the active period reloads it, so
/// the working set always reflects the caller's own writes.
pub struct ContactSync {
    config: SyncConfig,
    repository: Arc<PartitionRepository>,
    migrations: MigrationCoordinator,
    active: ActivePeriodController,
    queries: GlobalQueryService,
    /// Connectivity as last reported through `notify_connectivity`.
    online: Mutex<bool>,
}

impl ContactSync {
    /// Open local storage under `config.data_dir` and attach `remote`.
    ///
    /// Writes left in the queue by a previous run are replayed right away
    /// when the remote is reachable.
    pub fn open(config: SyncConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate()?;
        let local = FileLocalStore::open(&config.data_dir, config.create_if_missing)?;
        Self::with_local_store(config, remote, Arc::new(local))
    }

    /// Like [`open`](Self::open) with caller-provided local storage.
    pub fn with_local_store(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(SyncQueue::open(local, config.queue_key.clone())?);
        let online = remote.is_online();
        let repository = Arc::new(PartitionRepository::new(remote, queue));

        if !online {
            repository.pause_direct_writes();
        }

        let engine = Self {
            migrations: MigrationCoordinator::new(Arc::clone(&repository)),
            active: ActivePeriodController::new(Arc::clone(&repository), config.subscriber_buffer),
            queries: GlobalQueryService::new(Arc::clone(&repository), config.fetch_concurrency),
            repository,
            online: Mutex::new(online),
            config,
        };

        if online && engine.queue().has_pending() {
            info!(pending = engine.queue().len(), "replaying writes from previous session");
            engine.sync_pending()?;
        }

        Ok(engine)
    }

    /// Configuration the engine was opened with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Partition repository all writes go through.
    pub fn repository(&self) -> &Arc<PartitionRepository> {
        &self.repository
    }

    /// Writes waiting for the remote store.
    pub fn queue(&self) -> &Arc<SyncQueue> {
        self.repository.queue()
    }

    /// The month currently on screen and its working set.
    pub fn active(&self) -> &ActivePeriodController {
        &self.active
    }

    /// Queries spanning every populated month.
    pub fn queries(&self) -> &GlobalQueryService {
        &self.queries
    }

    /// Coordinator for moving contacts between months.
    pub fn migrations(&self) -> &MigrationCoordinator {
        &self.migrations
    }

    /// The year window global queries probe by default.
    pub fn default_range(&self) -> Result<YearRange> {
        YearRange::around(
            active::today().year(),
            self.config.years_back,
            self.config.years_forward,
        )
    }

    /// Validate and add a new contact to the month of its date.
    pub fn add_contact(&self, contact: Contact) -> Result<WriteOutcome<Contact>> {
        contact.validate(active::today())?;
        let period = contact.period();

        let outcome = self.repository.add_record(period, contact)?;
        if !outcome.is_queued() {
            self.refresh_if_active(&[period]);
        }
        Ok(outcome)
    }

    /// Save an edited contact that currently lives in `original`.
    ///
    /// Stays an in-place update while the date remains in `original`;
    /// otherwise the contact migrates to its new month.
    pub fn save_contact(&self, original: Period, contact: Contact) -> Result<SaveOutcome> {
        contact.validate(active::today())?;
        let target = contact.period();

        let outcome = if target == original {
            match self.repository.update_record(original, contact)? {
                WriteOutcome::Applied(contact) => SaveOutcome::Updated(contact),
                WriteOutcome::Queued => SaveOutcome::Queued,
            }
        } else {
            match self.migrations.migrate(&contact, original, target)? {
                MigrationOutcome::Moved { contact } => SaveOutcome::Moved {
                    from: original,
                    contact,
                },
                MigrationOutcome::Queued => SaveOutcome::Queued,
            }
        };

        if outcome != SaveOutcome::Queued {
            self.refresh_if_active(&[original, target]);
        }
        Ok(outcome)
    }

    /// Remove a contact from `period`.
    pub fn delete_contact(&self, period: Period, id: ContactId) -> Result<WriteOutcome<Contact>> {
        let outcome = self.repository.remove_record(period, id)?;
        if !outcome.is_queued() {
            self.refresh_if_active(&[period]);
        }
        Ok(outcome)
    }

    /// Record a connectivity change reported by the remote adapter.
    ///
    /// Going offline pauses direct writes. Going from offline to online
    /// replays the queue once and only then lets writes reach the remote
    /// store directly; the report of that replay is returned. Any other
    /// transition returns `None`.
    pub fn notify_connectivity(&self, online: bool) -> Result<Option<ReplayReport>> {
        let was_online = std::mem::replace(&mut *self.online.lock(), online);
        match (was_online, online) {
            (false, true) => {
                info!(pending = self.queue().len(), "remote reachable again");
                match self.sync_pending() {
                    Ok(report) => Ok(Some(report)),
                    Err(e) => {
                        // Stay offline so the next notification retries.
                        *self.online.lock() = false;
                        Err(e)
                    }
                }
            }
            (true, false) => {
                info!("remote unreachable, writes will be queued");
                self.repository.pause_direct_writes();
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Replay every queued write, then reload the active period.
    ///
    /// Direct writes resume afterwards when the engine considers the remote
    /// online. Entries that failed and stayed queued keep later writes
    /// queued behind them.
    pub fn sync_pending(&self) -> Result<ReplayReport> {
        let report = self.queue().replay_all(self.repository.as_ref())?;
        if *self.online.lock() {
            self.repository.resume_direct_writes();
        }
        if report.replayed > 0 {
            if let Err(e) = self.active.refresh() {
                warn!(error = %e, "active period reload after replay failed");
            }
        }
        Ok(report)
    }

    /// Import spreadsheet rows; dates missing from a row default to today.
    pub fn import_rows(&self, rows: &[RawRow]) -> ImportReport {
        let report = import::import_rows(&self.repository, rows, active::today());
        if report.imported > 0 {
            let touched: Vec<Period> = report.periods.iter().copied().collect();
            self.refresh_if_active(&touched);
        }
        report
    }

    fn refresh_if_active(&self, periods: &[Period]) {
        let Some(active) = self.active.current_period() else {
            return;
        };
        if !periods.contains(&active) {
            return;
        }
        if let Err(e) = self.active.refresh() {
            // The write itself succeeded; the controller already reports
            // the failed load.
            warn!(period = %active, error = %e, "active period reload failed");
        }
    }
}
