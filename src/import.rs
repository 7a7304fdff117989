//! Spreadsheet row import.
//!
//! Rows arrive as (column label, cell) pairs from whatever sheet the user
//! picked. Each contact field is located by an ordered list of label rules;
//! the first column whose lowercased label satisfies a field's rule wins.

use crate::partitions::PartitionRepository;
use crate::types::{Contact, Period, WriteOutcome};
use chrono::{Duration, NaiveDate};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Project reference used when a row has none.
pub const DEFAULT_PROJECT_REF: &str = "Imported project";

/// Spreadsheet serial of 1970-01-01.
const SERIAL_UNIX_EPOCH: f64 = 25569.0;

const NEW_CLIENT_VALUES: &[&str] = &["nuovo", "new", "sì", "si", "yes", "true", "1"];

/// One raw spreadsheet row, columns in sheet order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, Value)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cells.push((label.into(), value.into()));
        self
    }

    pub fn cells(&self) -> &[(String, Value)] {
        &self.cells
    }

    /// First cell whose lowercased label satisfies `rule`.
    fn find(&self, rule: &LabelRule) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(label, _)| rule.matches(&label.trim().to_lowercase()))
            .map(|(_, value)| value)
    }
}

impl From<Map<String, Value>> for RawRow {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            cells: map.into_iter().collect(),
        }
    }
}

/// Why a row could not become a contact.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct RejectedRow {
    pub reason: String,
}

impl RejectedRow {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

enum LabelRule {
    Contains(&'static [&'static str]),
    Equals(&'static [&'static str]),
}

impl LabelRule {
    fn matches(&self, label: &str) -> bool {
        match self {
            LabelRule::Contains(needles) => needles.iter().any(|n| label.contains(n)),
            LabelRule::Equals(names) => names.iter().any(|n| label == *n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    SalesRep,
    ContactMethod,
    ClientName,
    NewClient,
    Date,
    Place,
    Province,
    ProjectType,
    ProjectRef,
    ContactPerson,
    Comments,
}

const RULES: &[(Field, LabelRule)] = &[
    (Field::SalesRep, LabelRule::Contains(&["commercial"])),
    (Field::ContactMethod, LabelRule::Contains(&["modalit", "modality"])),
    (
        Field::ClientName,
        LabelRule::Equals(&["cliente", "client", "customer", "company", "azienda"]),
    ),
    (Field::NewClient, LabelRule::Contains(&["nuovo", "new", "tipo"])),
    (Field::Date, LabelRule::Equals(&["data", "date", "datetime"])),
    (Field::Place, LabelRule::Equals(&["luogo", "place", "city", "location"])),
    (Field::Province, LabelRule::Equals(&["provincia", "province", "state"])),
    (Field::ProjectType, LabelRule::Equals(&["tipo"])),
    (
        Field::ProjectRef,
        LabelRule::Contains(&["progetto", "project", "description"]),
    ),
    (
        Field::ContactPerson,
        LabelRule::Contains(&["persona", "riferimento", "contact"]),
    ),
    (Field::Comments, LabelRule::Contains(&["comment", "note", "osservaz"])),
];

fn cell(row: &RawRow, field: Field) -> Option<&Value> {
    RULES
        .iter()
        .find(|(f, _)| *f == field)
        .and_then(|(_, rule)| row.find(rule))
}

/// Trimmed text of a cell; empty cells read as absent.
fn text(row: &RawRow, field: Field) -> Option<String> {
    let text = match cell(row, field)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Parse a date cell: ISO `yyyy-mm-dd`, `dd/mm/yyyy`, or a spreadsheet
/// serial day number.
pub fn parse_date_cell(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n.as_f64().and_then(serial_to_date),
        Value::String(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let days = (serial - SERIAL_UNIX_EPOCH).floor();
    if days.abs() > 3_000_000.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(Duration::days(days as i64))
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').map(str::trim).collect();
        if let [day, month, year] = parts.as_slice() {
            return NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?);
        }
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    // ISO date-time: keep the calendar date
    match s.get(..10) {
        Some(prefix) if matches!(s.as_bytes().get(10), Some(b'T') | Some(b' ')) => {
            NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
        }
        _ => None,
    }
}

/// Turn one raw row into a candidate contact.
///
/// A missing or empty date cell takes `reference_date`; an unparseable one
/// rejects the row. Rows without a sales rep or client name are rejected.
/// The returned contact has id 0; the repository assigns the real one.
pub fn normalize_row(row: &RawRow, reference_date: NaiveDate) -> Result<Contact, RejectedRow> {
    let sales_rep = text(row, Field::SalesRep)
        .ok_or_else(|| RejectedRow::new("missing sales rep"))?;
    let client_name = text(row, Field::ClientName)
        .ok_or_else(|| RejectedRow::new("missing client name"))?;

    let date = match cell(row, Field::Date) {
        None | Some(Value::Null) => reference_date,
        Some(Value::String(s)) if s.trim().is_empty() => reference_date,
        Some(value) => parse_date_cell(value)
            .ok_or_else(|| RejectedRow::new(format!("unreadable date {}", value)))?,
    };

    let is_new_client = text(row, Field::NewClient)
        .map(|v| NEW_CLIENT_VALUES.contains(&v.to_lowercase().as_str()))
        .unwrap_or(false);

    let mut contact = Contact::new(sales_rep, client_name, date)
        .with_new_client(is_new_client)
        .with_project(
            text(row, Field::ProjectType)
                .map(|t| t.to_uppercase())
                .unwrap_or_default(),
            text(row, Field::ProjectRef).unwrap_or_else(|| DEFAULT_PROJECT_REF.to_string()),
        );
    contact.contact_method = text(row, Field::ContactMethod).unwrap_or_default();
    contact.place = text(row, Field::Place);
    contact.province = text(row, Field::Province);
    contact.contact_person = text(row, Field::ContactPerson);
    contact.comments = text(row, Field::Comments);

    Ok(contact)
}

/// Outcome of importing a batch of rows. Row numbers are 1-based.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Accepted rows captured by the sync queue while offline.
    pub queued: usize,
    pub rejected: Vec<(usize, String)>,
    /// Accepted rows whose write failed.
    pub failed: Vec<(usize, String)>,
    pub periods: BTreeSet<Period>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.imported + self.queued + self.rejected.len() + self.failed.len()
    }
}

/// Normalize `rows` and add every accepted one to the partition of its date.
///
/// Rows are processed in order; one bad row never stops the batch.
pub fn import_rows(
    repository: &PartitionRepository,
    rows: &[RawRow],
    reference_date: NaiveDate,
) -> ImportReport {
    let mut report = ImportReport::default();

    for (index, row) in rows.iter().enumerate() {
        let number = index + 1;
        let candidate = match normalize_row(row, reference_date) {
            Ok(contact) => contact,
            Err(rejected) => {
                debug!(row = number, reason = %rejected, "import row rejected");
                report.rejected.push((number, rejected.reason));
                continue;
            }
        };

        let period = candidate.period();
        match repository.add_record(period, candidate) {
            Ok(WriteOutcome::Applied(_)) => {
                report.imported += 1;
                report.periods.insert(period);
            }
            Ok(WriteOutcome::Queued) => {
                report.queued += 1;
                report.periods.insert(period);
            }
            Err(e) => {
                warn!(row = number, period = %period, error = %e, "import row failed");
                report.failed.push((number, e.to_string()));
            }
        }
    }

    info!(
        imported = report.imported,
        queued = report.queued,
        rejected = report.rejected.len(),
        failed = report.failed.len(),
        "import finished"
    );
    report
}
