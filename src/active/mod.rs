//! Active period state.
//!
//! The [`ActivePeriodController`] holds the one partition the user is
//! working in, its filtered view, and publishes every change to the
//! working set:
//!
//! ```ignore
//! let sub = controller.subscribe();
//! controller.set_period(Period::new(2025, 3)?)?;
//!
//! while let Ok(event) = sub.try_recv() {
//!     if let WorkingSetEvent::Loaded { contacts, .. } = event {
//!         render(&contacts);
//!     }
//! }
//! ```

mod controller;
mod events;

pub(crate) use controller::today;
pub use controller::{ActivePeriodController, LoadOutcome, LoadState, LoadTicket};
pub use events::{DropReason, SubscriptionId, WorkingSetEvent, WorkingSetSubscription};
