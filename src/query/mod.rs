//! Record filtering and cross-period queries.
//!
//! [`ContactFilter`] narrows the active working set in memory.
//! [`GlobalQueryService`] probes every partition in a [`YearRange`] and
//! answers discovery, search, statistics and export requests from the
//! populated ones.

mod filter;
mod global;

pub use filter::{ClientType, ContactFilter, QuickFilter, SearchCriteria};
pub use global::{
    ExportedPartition, GlobalQueryService, GlobalStatistics, MonthlyTrend, PeriodMatch,
    PeriodSummary, StorageStats, YearRange, MAX_YEAR_SPAN, UNSPECIFIED_REP,
};
