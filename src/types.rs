//! Core types for the contact sync layer.

use crate::error::{Result, SyncError};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Partition-local identifier for a contact.
///
/// Ids are unique only within one partition; the same id may appear in
/// every month of the year.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(pub u64);

impl fmt::Debug for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactId({})", self.0)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calendar month key of a partition.
///
/// Ordering is chronological (year first, then month).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Create a period, rejecting months outside 1..=12 and years no
    /// calendar date can carry.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(SyncError::InvalidPeriod { year, month });
        }
        Ok(Self { year, month })
    }

    /// The period a calendar date belongs to.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Calendar year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Month number, 1 for January.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following month. Fails past the last representable year.
    pub fn next(self) -> Result<Self> {
        if self.month == 12 {
            let year = self.year.checked_add(1).ok_or(SyncError::InvalidPeriod {
                year: self.year,
                month: 13,
            })?;
            Period::new(year, 1)
        } else {
            Period::new(self.year, self.month + 1)
        }
    }

    /// The preceding month. Fails before the first representable year.
    pub fn prev(self) -> Result<Self> {
        if self.month == 1 {
            let year = self.year.checked_sub(1).ok_or(SyncError::InvalidPeriod {
                year: self.year,
                month: 0,
            })?;
            Period::new(year, 12)
        } else {
            Period::new(self.year, self.month - 1)
        }
    }

    /// Whether a date falls inside this period.
    pub fn contains(&self, date: NaiveDate) -> bool {
        Period::of(date) == *self
    }

    /// Remote document id (`"2025_1"` for January 2025).
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.year, self.month)
    }
}

impl fmt::Debug for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Period({:04}-{:02})", self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A single sales contact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Partition-local id (assigned by the repository on add).
    pub id: ContactId,

    pub sales_rep: String,

    pub contact_method: String,

    pub is_new_client: bool,

    /// Determines partition membership.
    pub date: NaiveDate,

    pub client_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,

    #[serde(default)]
    pub project_type: String,

    #[serde(default)]
    pub project_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Maximum field lengths accepted by [`Contact::validate`].
const FIELD_LIMITS: &[(&str, usize)] = &[
    ("clientName", 100),
    ("contactPerson", 100),
    ("place", 100),
    ("province", 50),
    ("projectRef", 500),
    ("comments", 1000),
];

impl Contact {
    /// Create a contact with the three fields every record needs.
    ///
    /// The id is left at zero; the repository assigns the real one.
    pub fn new(sales_rep: impl Into<String>, client_name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: ContactId(0),
            sales_rep: sales_rep.into(),
            contact_method: String::new(),
            is_new_client: false,
            date,
            client_name: client_name.into(),
            contact_person: None,
            place: None,
            province: None,
            project_type: String::new(),
            project_ref: String::new(),
            comments: None,
        }
    }

    /// Set the partition-local id.
    pub fn with_id(mut self, id: ContactId) -> Self {
        self.id = id;
        self
    }

    /// Set how the client was contacted (phone, visit, email).
    pub fn with_contact_method(mut self, method: impl Into<String>) -> Self {
        self.contact_method = method.into();
        self
    }

    /// Mark the client as new or existing.
    pub fn with_new_client(mut self, is_new: bool) -> Self {
        self.is_new_client = is_new;
        self
    }

    /// Set the province.
    pub fn with_province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    /// Set the town or site of the contact.
    pub fn with_place(mut self, place: impl Into<String>) -> Self {
        self.place = Some(place.into());
        self
    }

    /// Set the project type code and its free-text reference.
    pub fn with_project(mut self, project_type: impl Into<String>, project_ref: impl Into<String>) -> Self {
        self.project_type = project_type.into();
        self.project_ref = project_ref.into();
        self
    }

    /// Set the person spoken to.
    pub fn with_contact_person(mut self, person: impl Into<String>) -> Self {
        self.contact_person = Some(person.into());
        self
    }

    /// Set free-form notes.
    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    /// The partition this contact belongs to.
    pub fn period(&self) -> Period {
        Period::of(self.date)
    }

    /// Check required fields, length limits and that the date is not in
    /// the future relative to `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        let required = [
            ("salesRep", &self.sales_rep),
            ("contactMethod", &self.contact_method),
            ("clientName", &self.client_name),
            ("projectRef", &self.project_ref),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::Validation(format!("{} is required", name)));
            }
        }

        for (name, max) in FIELD_LIMITS {
            let len = self.field_len(name);
            if len > *max {
                return Err(SyncError::Validation(format!(
                    "{} exceeds {} characters ({})",
                    name, max, len
                )));
            }
        }

        if self.date > today {
            return Err(SyncError::Validation(format!(
                "date {} is in the future",
                self.date
            )));
        }

        Ok(())
    }

    fn field_len(&self, name: &str) -> usize {
        let opt = |v: &Option<String>| v.as_deref().map_or(0, |s| s.chars().count());
        match name {
            "clientName" => self.client_name.chars().count(),
            "contactPerson" => opt(&self.contact_person),
            "place" => opt(&self.place),
            "province" => opt(&self.province),
            "projectRef" => self.project_ref.chars().count(),
            "comments" => opt(&self.comments),
            _ => 0,
        }
    }
}

/// Next partition-local id: max existing id + 1, or 1 when empty.
pub fn next_id(contacts: &[Contact]) -> ContactId {
    contacts
        .iter()
        .map(|c| c.id.0)
        .max()
        .map_or(ContactId(1), |max| ContactId(max + 1))
}

/// Wire shape of a partition document in the remote store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionDocument {
    #[serde(default)]
    pub contacts: Vec<Contact>,

    /// Set by the server on every write.
    #[serde(default)]
    pub last_modified: Option<Timestamp>,

    pub year: i32,

    pub month: u32,

    pub total_contacts: usize,
}

impl PartitionDocument {
    /// Build a document for a write; the server fills in `last_modified`.
    pub fn new(period: Period, contacts: Vec<Contact>) -> Self {
        let total_contacts = contacts.len();
        Self {
            contacts,
            last_modified: None,
            year: period.year(),
            month: period.month(),
            total_contacts,
        }
    }

    /// Period named by the document's `year` and `month` fields.
    pub fn period(&self) -> Result<Period> {
        Period::new(self.year, self.month)
    }
}

/// Result of loading one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub period: Period,
    pub contacts: Vec<Contact>,
    pub last_modified: Option<Timestamp>,
}

impl PartitionSnapshot {
    /// An absent partition reads as an empty one.
    pub fn empty(period: Period) -> Self {
        Self {
            period,
            contacts: Vec::new(),
            last_modified: None,
        }
    }

    /// Id the next add to this partition receives.
    pub fn next_id(&self) -> ContactId {
        next_id(&self.contacts)
    }

    /// True when the partition holds no contacts.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Number of contacts in the partition.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// The contact with `id`, if present.
    pub fn find(&self, id: ContactId) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }
}

/// Whether a write reached the remote store or was deferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// Persisted remotely.
    Applied(T),
    /// Captured by the sync queue while offline.
    Queued,
}

impl<T> WriteOutcome<T> {
    /// True when the write waits in the sync queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued)
    }

    /// The applied value, or `None` when queued.
    pub fn applied(self) -> Option<T> {
        match self {
            WriteOutcome::Applied(value) => Some(value),
            WriteOutcome::Queued => None,
        }
    }
}
