//! # booking-kit
//!
//! Scheduling engine for home-service bookings and recurring subscriptions.
//!
//! ## Features
//!
//! - **Status Transitions:** One exhaustive table decides which actions are legal for bookings and subscriptions
//! - **Slot Availability:** Per-date, per-slot availability over a bounded window, with free-form categories bypassing it
//! - **Race-Safe Reschedule:** Every confirm re-checks the slot against the live source before committing
//! - **Single-Flight Actions:** Pause, cancel, resume and reactivate with reason capture and duplicate-click protection
//! - **Progress & Pricing:** Term and billing-cycle progress plus price totals, derived and never stored
//! - **Transport Agnostic:** Talks to the backend only through the [`SchedulingSource`] trait
//!
//! ## Quick Start
//!
//! ### Rescheduling a booking
//!
//! ```ignore
//! use booking_kit::{SchedulingService, Error, model::TimeSlot, source::InMemorySource};
//!
//! let service = SchedulingService::new(InMemorySource::new());
//!
//! // 1. Open a flow; availability is loaded for slotted categories
//! let flow = service.open_reschedule(booking, today).await?;
//!
//! // 2. Pick a date, then one of the offered slots
//! flow.select_date(tomorrow)?;
//! let options = flow.time_options();
//! flow.select_time(TimeSlot::Morning)?;
//!
//! // 3. Confirm; the slot is checked again before the mutation runs
//! match flow.confirm().await {
//!     Ok(Some(done)) => println!("moved to {} {}", done.date, done.slot),
//!     Ok(None) => {} // already in flight
//!     Err(Error::SlotNoLongerAvailable { .. }) => {
//!         // date kept, time cleared, fresh options in flow.time_options()
//!     }
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```
//!
//! ### Cancelling a subscription
//!
//! ```ignore
//! use booking_kit::{action::ReasonChoice, transition::Action};
//!
//! let flow = service.start_action(Action::Cancel, subscription, today)?;
//! flow.select_reason(ReasonChoice::preset("too_expensive"))?;
//! let outcome = flow.confirm().await?;
//! ```

#[macro_use]
extern crate log;

pub mod action;
pub mod availability;
pub mod error;
pub mod key;
pub mod model;
pub mod observability;
pub mod policy;
pub mod progress;
pub mod reschedule;
pub mod service;
pub mod source;
pub mod strategy;
pub mod transition;

// Re-exports for convenience
pub use action::{ActionConfirmationFlow, ActionOutcome, ActionRequest, FlowPhase};
pub use availability::{SchedulingWindow, SlotAvailabilityResolver};
pub use error::{Error, InputField, Result};
pub use policy::SchedulingPolicy;
pub use progress::ProgressCalculator;
pub use reschedule::{Reschedule, ReschedulePhase, RescheduleValidator};
pub use service::SchedulingService;
pub use source::SchedulingSource;
pub use strategy::SnapshotStrategy;
pub use transition::{Action, EntityKind, Status, StatusTransitionTable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
