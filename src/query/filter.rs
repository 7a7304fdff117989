//! Record predicates: the active filter set and cross-period search criteria.

use crate::types::Contact;
use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Which clients a filter keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    All,
    New,
    Existing,
}

/// Preset filters offered next to the full filter form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuickFilter {
    Today,
    LastWeek,
    LastMonth,
    NewClients,
    ExistingClients,
}

/// Filter applied to the active working set.
///
/// Every populated criterion must match. `search` is a case-insensitive
/// substring looked up in the free-text fields; `sales_rep`,
/// `contact_method` and `project_type` compare exactly; `province` is a
/// case-insensitive substring; date bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactFilter {
    pub search: Option<String>,
    pub client_type: ClientType,
    pub sales_rep: Option<String>,
    pub contact_method: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub province: Option<String>,
    pub project_type: Option<String>,
}

impl ContactFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset relative to `today`. Date presets end on `today` inclusive.
    pub fn quick(kind: QuickFilter, today: NaiveDate) -> Self {
        let mut filter = Self::default();
        match kind {
            QuickFilter::Today => {
                filter.date_from = Some(today);
                filter.date_to = Some(today);
            }
            QuickFilter::LastWeek => {
                filter.date_from = Some(today - Duration::days(7));
                filter.date_to = Some(today);
            }
            QuickFilter::LastMonth => {
                filter.date_from = Some(today.checked_sub_months(Months::new(1)).unwrap_or(today));
                filter.date_to = Some(today);
            }
            QuickFilter::NewClients => filter.client_type = ClientType::New,
            QuickFilter::ExistingClients => filter.client_type = ClientType::Existing,
        }
        filter
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn with_client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = client_type;
        self
    }

    pub fn with_sales_rep(mut self, rep: impl Into<String>) -> Self {
        self.sales_rep = Some(rep.into());
        self
    }

    pub fn with_contact_method(mut self, method: impl Into<String>) -> Self {
        self.contact_method = Some(method.into());
        self
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    pub fn with_project_type(mut self, project_type: impl Into<String>) -> Self {
        self.project_type = Some(project_type.into());
        self
    }

    /// True when no criterion is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        if let Some(needle) = normalized(&self.search) {
            let fields = [
                Some(contact.client_name.as_str()),
                Some(contact.sales_rep.as_str()),
                contact.place.as_deref(),
                contact.province.as_deref(),
                Some(contact.project_ref.as_str()),
                contact.contact_person.as_deref(),
                contact.comments.as_deref(),
            ];
            if !fields.iter().flatten().any(|f| contains_ci(f, &needle)) {
                return false;
            }
        }

        let client_ok = match self.client_type {
            ClientType::All => true,
            ClientType::New => contact.is_new_client,
            ClientType::Existing => !contact.is_new_client,
        };
        if !client_ok {
            return false;
        }

        if !exact(&self.sales_rep, &contact.sales_rep)
            || !exact(&self.contact_method, &contact.contact_method)
            || !exact(&self.project_type, &contact.project_type)
        {
            return false;
        }

        if self.date_from.is_some_and(|from| contact.date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| contact.date > to) {
            return false;
        }

        if let Some(needle) = normalized(&self.province) {
            match contact.province.as_deref() {
                Some(province) if contains_ci(province, &needle) => {}
                _ => return false,
            }
        }

        true
    }

    /// Matching contacts, in their original order.
    pub fn apply(&self, contacts: &[Contact]) -> Vec<Contact> {
        contacts.iter().filter(|c| self.matches(c)).cloned().collect()
    }
}

/// Criteria for searching every populated period.
///
/// Conjunctive; each populated field is a case-insensitive substring match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchCriteria {
    pub client_name: Option<String>,
    pub sales_rep: Option<String>,
    pub province: Option<String>,
    pub contact_method: Option<String>,
}

impl SearchCriteria {
    pub fn client(name: impl Into<String>) -> Self {
        Self {
            client_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_sales_rep(mut self, rep: impl Into<String>) -> Self {
        self.sales_rep = Some(rep.into());
        self
    }

    pub fn with_province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    pub fn with_contact_method(mut self, method: impl Into<String>) -> Self {
        self.contact_method = Some(method.into());
        self
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        substring(&self.client_name, Some(&contact.client_name))
            && substring(&self.sales_rep, Some(&contact.sales_rep))
            && substring(&self.province, contact.province.as_deref())
            && substring(&self.contact_method, Some(&contact.contact_method))
    }
}

/// Lowercased, trimmed criterion; blank counts as unset.
fn normalized(criterion: &Option<String>) -> Option<String> {
    criterion
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_lowercase().contains(lowered_needle)
}

fn exact(criterion: &Option<String>, value: &str) -> bool {
    match criterion.as_deref() {
        None | Some("") => true,
        Some(expected) => expected == value,
    }
}

fn substring(criterion: &Option<String>, value: Option<&str>) -> bool {
    match normalized(criterion) {
        None => true,
        Some(needle) => value.is_some_and(|v| contains_ci(v, &needle)),
    }
}
