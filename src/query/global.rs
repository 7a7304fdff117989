//! Queries spanning every partition in a year window.

use super::filter::SearchCriteria;
use crate::error::{Result, SyncError};
use crate::partitions::PartitionRepository;
use crate::types::{Contact, ContactId, PartitionSnapshot, Period, Timestamp};
use crossbeam_channel::unbounded;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Label used for contacts with no sales rep.
pub const UNSPECIFIED_REP: &str = "Unspecified";

/// Most years a single global query may probe.
pub const MAX_YEAR_SPAN: i32 = 100;

/// Inclusive range of calendar years, at most [`MAX_YEAR_SPAN`] long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct YearRange {
    first: i32,
    last: i32,
}

impl YearRange {
    /// `first..=last`. Rejects empty ranges, ranges longer than
    /// [`MAX_YEAR_SPAN`] years and years no period can carry.
    pub fn new(first: i32, last: i32) -> Result<Self> {
        if first > last {
            return Err(SyncError::Validation(format!(
                "year range {}..={} is empty",
                first, last
            )));
        }
        let span = i64::from(last) - i64::from(first) + 1;
        if span > i64::from(MAX_YEAR_SPAN) {
            return Err(SyncError::Validation(format!(
                "year range {}..={} spans {} years, more than {}",
                first, last, span, MAX_YEAR_SPAN
            )));
        }
        Period::new(first, 1)?;
        Period::new(last, 12)?;
        Ok(Self { first, last })
    }

    /// `back` years before `year` through `forward` years after it.
    pub fn around(year: i32, back: i32, forward: i32) -> Result<Self> {
        let out_of_range = || SyncError::Validation(format!("year window around {} overflows", year));
        let first = year.checked_sub(back.max(0)).ok_or_else(out_of_range)?;
        let last = year.checked_add(forward.max(0)).ok_or_else(out_of_range)?;
        Self::new(first, last)
    }

    /// First year probed.
    pub fn first(&self) -> i32 {
        self.first
    }

    /// Last year probed.
    pub fn last(&self) -> i32 {
        self.last
    }

    /// Every month in the range, chronologically.
    pub fn periods(&self) -> impl Iterator<Item = Period> {
        let (first, last) = (self.first, self.last);
        (first..=last).flat_map(|year| {
            (1..=12u32).filter_map(move |month| Period::new(year, month).ok())
        })
    }
}

/// A populated partition found by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub period: Period,
    pub count: usize,
    pub last_modified: Option<Timestamp>,
}

/// A search hit annotated with the partition it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeriodMatch {
    pub period: Period,
    pub contact: Contact,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTrend {
    pub period: Period,
    pub count: usize,
    pub new_clients: usize,
}

/// Totals over every populated partition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatistics {
    pub total_contacts: usize,
    pub total_new_clients: usize,
    pub total_existing_clients: usize,
    /// Percentage of new clients, rounded to the nearest integer.
    pub new_client_rate: u32,
    pub by_sales_rep: BTreeMap<String, usize>,
    pub monthly_trend: Vec<MonthlyTrend>,
    pub periods_count: usize,
    /// Earliest and latest populated periods.
    pub date_range: Option<(Period, Period)>,
}

/// One partition in a full export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedPartition {
    pub contacts: Vec<Contact>,
    pub next_id: ContactId,
    pub last_modified: Option<Timestamp>,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_contacts: usize,
    pub total_periods: usize,
    pub last_check: Timestamp,
    pub periods: Vec<PeriodSummary>,
}

/// Read-only queries over all partitions in a year range.
///
/// Every month of the range is probed, at most `concurrency` loads in
/// flight. A load failure anywhere fails the whole query; results are
/// never silently partial.
pub struct GlobalQueryService {
    repository: Arc<PartitionRepository>,
    concurrency: usize,
}

impl GlobalQueryService {
    pub fn new(repository: Arc<PartitionRepository>, concurrency: usize) -> Self {
        Self {
            repository,
            concurrency: concurrency.max(1),
        }
    }

    /// Periods with at least one contact, chronologically.
    pub fn discover_populated_periods(&self, range: YearRange) -> Result<Vec<PeriodSummary>> {
        Ok(self
            .populated(range)?
            .into_iter()
            .map(|snapshot| PeriodSummary {
                period: snapshot.period,
                count: snapshot.len(),
                last_modified: snapshot.last_modified,
            })
            .collect())
    }

    pub fn search_across_periods(
        &self,
        criteria: &SearchCriteria,
        range: YearRange,
    ) -> Result<Vec<PeriodMatch>> {
        let mut matches = Vec::new();
        for snapshot in self.populated(range)? {
            let period = snapshot.period;
            matches.extend(
                snapshot
                    .contacts
                    .into_iter()
                    .filter(|c| criteria.matches(c))
                    .map(|contact| PeriodMatch { period, contact }),
            );
        }
        debug!(hits = matches.len(), "cross-period search");
        Ok(matches)
    }

    pub fn aggregate_statistics(&self, range: YearRange) -> Result<GlobalStatistics> {
        let populated = self.populated(range)?;
        let mut stats = GlobalStatistics {
            periods_count: populated.len(),
            ..Default::default()
        };

        for snapshot in &populated {
            let new_clients = snapshot.contacts.iter().filter(|c| c.is_new_client).count();
            stats.total_contacts += snapshot.len();
            stats.total_new_clients += new_clients;

            for contact in &snapshot.contacts {
                let rep = match contact.sales_rep.trim() {
                    "" => UNSPECIFIED_REP.to_string(),
                    rep => rep.to_string(),
                };
                *stats.by_sales_rep.entry(rep).or_insert(0) += 1;
            }

            stats.monthly_trend.push(MonthlyTrend {
                period: snapshot.period,
                count: snapshot.len(),
                new_clients,
            });
        }

        stats.total_existing_clients = stats.total_contacts - stats.total_new_clients;
        if stats.total_contacts > 0 {
            let rate = stats.total_new_clients as f64 * 100.0 / stats.total_contacts as f64;
            stats.new_client_rate = rate.round() as u32;
        }
        stats.date_range = match (stats.monthly_trend.first(), stats.monthly_trend.last()) {
            (Some(first), Some(last)) => Some((first.period, last.period)),
            _ => None,
        };

        Ok(stats)
    }

    /// Every populated partition keyed by its document id.
    pub fn export_all(&self, range: YearRange) -> Result<BTreeMap<String, ExportedPartition>> {
        Ok(self
            .populated(range)?
            .into_iter()
            .map(|snapshot| {
                let exported = ExportedPartition {
                    next_id: snapshot.next_id(),
                    last_modified: snapshot.last_modified,
                    count: snapshot.len(),
                    contacts: snapshot.contacts,
                };
                (snapshot.period.document_id(), exported)
            })
            .collect())
    }

    pub fn storage_stats(&self, range: YearRange) -> Result<StorageStats> {
        let periods = self.discover_populated_periods(range)?;
        Ok(StorageStats {
            total_contacts: periods.iter().map(|p| p.count).sum(),
            total_periods: periods.len(),
            last_check: Timestamp::now(),
            periods,
        })
    }

    fn populated(&self, range: YearRange) -> Result<Vec<PartitionSnapshot>> {
        let mut snapshots = self.fetch_all(range.periods().collect())?;
        snapshots.retain(|s| !s.is_empty());
        Ok(snapshots)
    }

    /// Load `periods` on a bounded worker pool, returning them in input order.
    fn fetch_all(&self, periods: Vec<Period>) -> Result<Vec<PartitionSnapshot>> {
        let total = periods.len();
        let workers = self.concurrency.min(total).max(1);

        let (job_tx, job_rx) = unbounded::<(usize, Period)>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<PartitionSnapshot>)>();
        for job in periods.into_iter().enumerate() {
            // Receiver is alive for the duration of this function
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let repository = &self.repository;
                scope.spawn(move || {
                    for (index, period) in job_rx.iter() {
                        let loaded = repository.load(period);
                        let failed = loaded.is_err();
                        if result_tx.send((index, loaded)).is_err() || failed {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<Result<PartitionSnapshot>>> = (0..total).map(|_| None).collect();
        for (index, loaded) in result_rx.try_iter() {
            slots[index] = Some(loaded);
        }

        // Slots left empty belong to workers that stopped after a failure,
        // which is reported at its own index.
        let mut snapshots = Vec::with_capacity(total);
        for loaded in slots.into_iter().flatten() {
            match loaded {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(error = %e, "global query load failed");
                    return Err(e);
                }
            }
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::queue::SyncQueue;
    use crate::remote::MemoryRemoteStore;
    use chrono::NaiveDate;

    fn setup() -> (Arc<MemoryRemoteStore>, GlobalQueryService) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = Arc::new(SyncQueue::open(Arc::new(MemoryLocalStore::new()), "q").unwrap());
        let repo = Arc::new(PartitionRepository::new(remote.clone(), queue));
        (remote, GlobalQueryService::new(repo, 3))
    }

    fn contact(rep: &str, client: &str, year: i32, month: u32, new: bool) -> Contact {
        Contact::new(rep, client, NaiveDate::from_ymd_opt(year, month, 1).unwrap())
            .with_new_client(new)
    }

    fn seed(remote: &MemoryRemoteStore) {
        let p = |y, m| Period::new(y, m).unwrap();
        remote.seed(
            p(2025, 3),
            vec![
                contact("Rossi", "Acme", 2025, 3, true).with_id(ContactId(1)),
                contact("", "Beta", 2025, 3, false).with_id(ContactId(4)),
            ],
        );
        remote.seed(
            p(2024, 11),
            vec![contact("Rossi", "Acme Two", 2024, 11, true).with_id(ContactId(1))],
        );
        // Exists but empty: must not be reported.
        remote.seed(p(2025, 1), vec![]);
    }

    fn range() -> YearRange {
        YearRange::new(2024, 2025).unwrap()
    }

    #[test]
    fn test_year_range() {
        assert!(YearRange::new(2026, 2025).is_err());
        let range = YearRange::around(2025, 2, 1).unwrap();
        assert_eq!((range.first(), range.last()), (2023, 2026));
        assert_eq!(range.periods().count(), 48);
    }

    #[test]
    fn test_year_range_is_bounded() {
        assert!(YearRange::new(1926, 2025).is_ok());
        assert!(matches!(YearRange::new(0, 1_000_000), Err(SyncError::Validation(_))));
        assert!(YearRange::new(i32::MIN, i32::MAX).is_err());
        assert!(YearRange::around(i32::MAX, 0, 1).is_err());
        assert!(YearRange::around(i32::MIN, 1, 0).is_err());
    }

    #[test]
    fn test_discovery_skips_empty_periods() {
        let (remote, service) = setup();
        seed(&remote);

        let found = service.discover_populated_periods(range()).unwrap();
        let periods: Vec<_> = found.iter().map(|s| s.period.to_string()).collect();
        assert_eq!(periods, vec!["2024-11", "2025-03"]);
        assert_eq!(found[1].count, 2);
        assert!(found.iter().all(|s| s.count > 0 && s.last_modified.is_some()));
        assert_eq!(remote.load_count(), 24);
    }

    #[test]
    fn test_search_annotates_period() {
        let (remote, service) = setup();
        seed(&remote);

        let hits = service
            .search_across_periods(&SearchCriteria::client("acme"), range())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].period, Period::new(2024, 11).unwrap());
        assert_eq!(hits[1].contact.client_name, "Acme");
    }

    #[test]
    fn test_statistics() {
        let (remote, service) = setup();
        seed(&remote);

        let stats = service.aggregate_statistics(range()).unwrap();
        assert_eq!(stats.total_contacts, 3);
        assert_eq!(stats.total_new_clients, 2);
        assert_eq!(stats.total_existing_clients, 1);
        assert_eq!(stats.new_client_rate, 67);
        assert_eq!(stats.by_sales_rep["Rossi"], 2);
        assert_eq!(stats.by_sales_rep[UNSPECIFIED_REP], 1);
        assert_eq!(stats.periods_count, 2);
        assert_eq!(stats.monthly_trend[0].new_clients, 1);
        assert_eq!(
            stats.date_range,
            Some((Period::new(2024, 11).unwrap(), Period::new(2025, 3).unwrap()))
        );
    }

    #[test]
    fn test_statistics_empty() {
        let (_, service) = setup();
        let stats = service.aggregate_statistics(range()).unwrap();
        assert_eq!(stats.total_contacts, 0);
        assert_eq!(stats.new_client_rate, 0);
        assert_eq!(stats.date_range, None);
    }

    #[test]
    fn test_export_and_storage_stats() {
        let (remote, service) = setup();
        seed(&remote);

        let export = service.export_all(range()).unwrap();
        assert_eq!(export.len(), 2);
        assert_eq!(export["2025_3"].next_id, ContactId(5));
        assert_eq!(export["2025_3"].count, 2);

        let stats = service.storage_stats(range()).unwrap();
        assert_eq!(stats.total_contacts, 3);
        assert_eq!(stats.total_periods, 2);
    }

    #[test]
    fn test_load_failure_fails_query() {
        let (remote, service) = setup();
        seed(&remote);
        remote.set_online(false);

        let err = service.discover_populated_periods(range()).unwrap_err();
        assert!(err.is_connectivity());
    }
}
