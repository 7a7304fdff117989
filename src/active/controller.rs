//! The active period and its working set.

use super::events::{Subscribers, SubscriptionId, WorkingSetEvent, WorkingSetSubscription};
use crate::error::Result;
use crate::partitions::PartitionRepository;
use crate::query::ContactFilter;
use crate::types::{Contact, PartitionSnapshot, Period, Timestamp};
use chrono::{Local, NaiveDate};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of the working set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading(Period),
    Loaded(Period),
    LoadFailed { period: Period, error: String },
}

/// Token for one in-flight load. Only the newest token may install its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    pub period: Period,
    generation: u64,
}

/// How a finished load was handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The working set was replaced.
    Applied(Arc<Vec<Contact>>),
    /// A newer request superseded this one; its result was discarded.
    Superseded,
}

impl LoadOutcome {
    pub fn contacts(&self) -> Option<&Arc<Vec<Contact>>> {
        match self {
            LoadOutcome::Applied(contacts) => Some(contacts),
            LoadOutcome::Superseded => None,
        }
    }
}

struct ActiveState {
    period: Option<Period>,
    generation: u64,
    load_state: LoadState,
    working_set: Arc<Vec<Contact>>,
    last_modified: Option<Timestamp>,
    filter: ContactFilter,
}

/// Owns the period the user is looking at and the contacts loaded for it.
///
/// Nothing is cached: every `set_period` (including returning to a period
/// seen before) loads the partition again. Loads run without holding the
/// state lock, so two overlapping requests can resolve in any order; each
/// carries a generation and only the latest request's result is installed.
pub struct ActivePeriodController {
    repository: Arc<PartitionRepository>,
    state: RwLock<ActiveState>,
    subscribers: Subscribers,
}

impl ActivePeriodController {
    pub fn new(repository: Arc<PartitionRepository>, subscriber_buffer: usize) -> Self {
        Self {
            repository,
            state: RwLock::new(ActiveState {
                period: None,
                generation: 0,
                load_state: LoadState::Idle,
                working_set: Arc::new(Vec::new()),
                last_modified: None,
                filter: ContactFilter::default(),
            }),
            subscribers: Subscribers::new(subscriber_buffer),
        }
    }

    pub fn current_period(&self) -> Option<Period> {
        self.state.read().period
    }

    pub fn load_state(&self) -> LoadState {
        self.state.read().load_state.clone()
    }

    /// The contacts of the active period, unfiltered.
    pub fn working_set(&self) -> Arc<Vec<Contact>> {
        Arc::clone(&self.state.read().working_set)
    }

    pub fn last_modified(&self) -> Option<Timestamp> {
        self.state.read().last_modified
    }

    /// Make `period` active and load it, replacing the working set.
    pub fn set_period(&self, period: Period) -> Result<LoadOutcome> {
        let ticket = self.begin_load(period);
        let loaded = self.repository.load(period);
        self.complete_load(ticket, loaded)
    }

    /// Reload the active period. `None` when no period was ever set.
    pub fn refresh(&self) -> Result<Option<LoadOutcome>> {
        match self.current_period() {
            Some(period) => self.set_period(period).map(Some),
            None => Ok(None),
        }
    }

    /// Move to the month after the active one (or after today's month).
    pub fn next_month(&self) -> Result<LoadOutcome> {
        let base = self.current_period().unwrap_or_else(today_period);
        self.set_period(base.next()?)
    }

    /// Move to the month before the active one (or before today's month).
    pub fn previous_month(&self) -> Result<LoadOutcome> {
        let base = self.current_period().unwrap_or_else(today_period);
        self.set_period(base.prev()?)
    }

    /// Make the current calendar month active.
    pub fn go_to_today(&self) -> Result<LoadOutcome> {
        self.set_period(today_period())
    }

    /// Start a load: `period` becomes the active request immediately.
    ///
    /// Split from [`complete_load`](Self::complete_load) so callers can
    /// drive the fetch themselves.
    pub fn begin_load(&self, period: Period) -> LoadTicket {
        let mut state = self.state.write();
        state.generation += 1;
        state.period = Some(period);
        state.load_state = LoadState::Loading(period);
        debug!(period = %period, generation = state.generation, "loading active period");

        self.subscribers.publish(WorkingSetEvent::Loading { period });
        LoadTicket {
            period,
            generation: state.generation,
        }
    }

    /// Install the result of a load started with `ticket`.
    ///
    /// Results for superseded tickets are discarded without touching the
    /// working set. A failed load empties the working set and returns the
    /// error; stale contents are never kept.
    pub fn complete_load(
        &self,
        ticket: LoadTicket,
        loaded: Result<PartitionSnapshot>,
    ) -> Result<LoadOutcome> {
        let mut state = self.state.write();
        if ticket.generation != state.generation {
            debug!(period = %ticket.period, "discarding superseded load");
            return Ok(LoadOutcome::Superseded);
        }

        match loaded {
            Ok(snapshot) => {
                let contacts = Arc::new(snapshot.contacts);
                state.working_set = Arc::clone(&contacts);
                state.last_modified = snapshot.last_modified;
                state.load_state = LoadState::Loaded(ticket.period);
                info!(period = %ticket.period, count = contacts.len(), "active period loaded");

                self.subscribers.publish(WorkingSetEvent::Loaded {
                    period: ticket.period,
                    contacts: Arc::clone(&contacts),
                    last_modified: snapshot.last_modified,
                });
                Ok(LoadOutcome::Applied(contacts))
            }
            Err(e) => {
                state.working_set = Arc::new(Vec::new());
                state.last_modified = None;
                state.load_state = LoadState::LoadFailed {
                    period: ticket.period,
                    error: e.to_string(),
                };
                warn!(period = %ticket.period, error = %e, "active period load failed");

                self.subscribers.publish(WorkingSetEvent::LoadFailed {
                    period: ticket.period,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn filter(&self) -> ContactFilter {
        self.state.read().filter.clone()
    }

    pub fn set_filter(&self, filter: ContactFilter) {
        let mut state = self.state.write();
        state.filter = filter.clone();
        self.subscribers.publish(WorkingSetEvent::FilterChanged { filter });
    }

    pub fn clear_filter(&self) {
        self.set_filter(ContactFilter::default());
    }

    /// The working set narrowed by the active filter.
    pub fn filtered(&self) -> Vec<Contact> {
        let state = self.state.read();
        state.filter.apply(&state.working_set)
    }

    pub fn subscribe(&self) -> WorkingSetSubscription {
        self.subscribers.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

fn today_period() -> Period {
    Period::of(today())
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::queue::SyncQueue;
    use crate::remote::MemoryRemoteStore;
    use crate::types::ContactId;

    fn setup() -> (Arc<MemoryRemoteStore>, Arc<PartitionRepository>, ActivePeriodController) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = Arc::new(SyncQueue::open(Arc::new(MemoryLocalStore::new()), "q").unwrap());
        let repo = Arc::new(PartitionRepository::new(remote.clone(), queue));
        let controller = ActivePeriodController::new(repo.clone(), 16);
        (remote, repo, controller)
    }

    fn period(month: u32) -> Period {
        Period::new(2025, month).unwrap()
    }

    fn contact(name: &str, month: u32, id: u64) -> Contact {
        Contact::new("A", name, NaiveDate::from_ymd_opt(2025, month, 3).unwrap()).with_id(ContactId(id))
    }

    #[test]
    fn test_starts_idle() {
        let (_, _, controller) = setup();
        assert_eq!(controller.load_state(), LoadState::Idle);
        assert_eq!(controller.current_period(), None);
        assert!(controller.working_set().is_empty());
        assert_eq!(controller.refresh().unwrap(), None);
    }

    #[test]
    fn test_set_period_replaces_working_set() {
        let (remote, _, controller) = setup();
        remote.seed(period(1), vec![contact("X", 1, 1), contact("Y", 1, 2)]);
        remote.seed(period(2), vec![contact("Z", 2, 1)]);

        controller.set_period(period(1)).unwrap();
        assert_eq!(controller.working_set().len(), 2);
        assert_eq!(controller.load_state(), LoadState::Loaded(period(1)));

        controller.set_period(period(2)).unwrap();
        assert_eq!(controller.working_set().len(), 1);
        assert_eq!(controller.working_set()[0].client_name, "Z");
    }

    #[test]
    fn test_no_caching_between_visits() {
        let (remote, _, controller) = setup();
        controller.set_period(period(1)).unwrap();
        controller.set_period(period(2)).unwrap();
        controller.set_period(period(1)).unwrap();
        assert_eq!(remote.load_count(), 3);
    }

    #[test]
    fn test_failed_load_empties_working_set() {
        let (remote, _, controller) = setup();
        remote.seed(period(1), vec![contact("X", 1, 1)]);
        controller.set_period(period(1)).unwrap();

        remote.set_online(false);
        let err = controller.set_period(period(1)).unwrap_err();
        assert!(err.is_connectivity());
        assert!(controller.working_set().is_empty());
        assert!(matches!(controller.load_state(), LoadState::LoadFailed { .. }));
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let (remote, repo, controller) = setup();
        remote.seed(period(1), vec![contact("X", 1, 1)]);
        remote.seed(period(2), vec![contact("Y", 2, 1), contact("Z", 2, 2)]);

        let first = controller.begin_load(period(1));
        let second = controller.begin_load(period(2));

        // The newer request resolves first, the older one afterwards.
        let applied = controller.complete_load(second, repo.load(period(2))).unwrap();
        assert!(applied.contacts().is_some());
        let stale = controller.complete_load(first, repo.load(period(1))).unwrap();
        assert_eq!(stale, LoadOutcome::Superseded);

        assert_eq!(controller.current_period(), Some(period(2)));
        assert_eq!(controller.working_set().len(), 2);
    }

    #[test]
    fn test_navigation() {
        let (_, _, controller) = setup();
        controller.set_period(Period::new(2024, 12).unwrap()).unwrap();
        controller.next_month().unwrap();
        assert_eq!(controller.current_period(), Some(period(1)));
        controller.previous_month().unwrap();
        controller.previous_month().unwrap();
        assert_eq!(controller.current_period(), Some(Period::new(2024, 11).unwrap()));

        controller.go_to_today().unwrap();
        assert_eq!(controller.current_period(), Some(today_period()));
    }

    #[test]
    fn test_filtered_view() {
        let (remote, _, controller) = setup();
        remote.seed(
            period(1),
            vec![contact("Acme", 1, 1), contact("Beta", 1, 2).with_new_client(true)],
        );
        controller.set_period(period(1)).unwrap();

        controller.set_filter(ContactFilter::new().with_search("acme"));
        assert_eq!(controller.filtered().len(), 1);
        assert_eq!(controller.working_set().len(), 2);

        controller.clear_filter();
        assert_eq!(controller.filtered().len(), 2);
    }

    #[test]
    fn test_subscribers_see_loads() {
        let (remote, _, controller) = setup();
        remote.seed(period(1), vec![contact("X", 1, 1)]);
        let sub = controller.subscribe();

        controller.set_period(period(1)).unwrap();

        let events = sub.drain();
        assert!(matches!(events[0], WorkingSetEvent::Loading { .. }));
        match &events[1] {
            WorkingSetEvent::Loaded { period: p, contacts, .. } => {
                assert_eq!(*p, period(1));
                assert_eq!(contacts.len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
