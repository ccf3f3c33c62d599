//! Collaborator trait for availability reads and entity mutations.
//!
//! The `SchedulingSource` trait decouples the engine from the transport that
//! actually talks to the booking backend (GraphQL, REST, a local database).
//! The engine only sees these five operations and never their wire format.
//!
//! # Implementing SchedulingSource
//!
//! - Reads (`fetch_availability`, `check_slot_availability`) must reflect the
//!   live state at call time; the engine relies on the slot check being fresh.
//! - `mutate_booking_reschedule` must claim the new slot with an
//!   at-most-one-winner guarantee (a conditional write or equivalent). A lost
//!   claim should be reported as `Error::SlotNoLongerAvailable`.
//! - Status mutations return the entity as stored after the change.
//!
//! # Testing
//!
//! [`InMemorySource`] is a thread-safe double that enforces the same rules
//! and counts every call:
//!
//! ```ignore
//! let source = InMemorySource::new();
//! source.set_capacity(ServiceCategory::Cleaning, tomorrow, TimeSlot::Morning, 1);
//! source.insert_booking(booking);
//! ```

use crate::availability::{DateAvailability, SlotAvailability};
use crate::error::{Error, Result};
use crate::model::{Booking, ServiceCategory, Subscription, TimeSlot};
use crate::transition::{Action, StatusTransitionTable};
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Result of a single-slot availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCheck {
    pub is_available: bool,
}

/// Payload of a status mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub action: Action,
    /// Reason label or free text; required for cancel and pause.
    pub reason: Option<String>,
    /// Caller-supplied next billing date; only set for reactivation.
    pub next_billing_date: Option<NaiveDate>,
}

impl StatusChange {
    pub fn new(action: Action) -> Self {
        StatusChange {
            action,
            reason: None,
            next_billing_date: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_next_billing_date(mut self, date: NaiveDate) -> Self {
        self.next_billing_date = Some(date);
        self
    }
}

/// Trait for the collaborator layer the engine reads from and mutates through.
///
/// **ASYNC:** all methods are async and awaited sequentially by the flows.
#[allow(async_fn_in_trait)]
pub trait SchedulingSource: Send + Sync {
    /// Per-date, per-slot availability for `category` over `[start, end]`.
    ///
    /// # Errors
    /// Returns `Err` if the source is unreachable.
    async fn fetch_availability(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category: ServiceCategory,
    ) -> Result<Vec<DateAvailability>>;

    /// Live availability of one slot.
    ///
    /// # Errors
    /// Returns `Err` if the source is unreachable.
    async fn check_slot_availability(
        &self,
        date: NaiveDate,
        slot: TimeSlot,
        category: ServiceCategory,
    ) -> Result<SlotCheck>;

    /// Move a booking to a new date and slot.
    ///
    /// # Errors
    /// Returns `Error::SlotNoLongerAvailable` when the claim lost a race,
    /// any other `Err` when the write failed.
    async fn mutate_booking_reschedule(
        &self,
        booking_id: &str,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> Result<Booking>;

    /// Apply a status action to a booking.
    ///
    /// # Errors
    /// Returns `Err` when the write failed or was rejected.
    async fn mutate_booking_status(&self, booking_id: &str, change: &StatusChange)
        -> Result<Booking>;

    /// Apply a status action to a subscription.
    ///
    /// # Errors
    /// Returns `Err` when the write failed or was rejected.
    async fn mutate_subscription_status(
        &self,
        subscription_id: &str,
        change: &StatusChange,
    ) -> Result<Subscription>;
}

// ============================================================================
// In-Memory Source
// ============================================================================

type SlotKey = (ServiceCategory, NaiveDate, TimeSlot);

#[derive(Default)]
struct CallCounters {
    availability_fetches: AtomicUsize,
    slot_checks: AtomicUsize,
    reschedule_mutations: AtomicUsize,
    status_mutations: AtomicUsize,
}

/// Snapshot of how often each operation was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    pub availability_fetches: usize,
    pub slot_checks: usize,
    pub reschedule_mutations: usize,
    pub status_mutations: usize,
}

/// In-memory scheduling source for tests and local development.
///
/// Slot capacity lives in a `DashMap`; a reschedule claims a unit with a
/// conditional decrement under the shard lock, so concurrent claims on the
/// last unit have exactly one winner.
///
/// Slots with no configured capacity read as full (`remaining` 0) in
/// availability fetches and re-checks. The reschedule mutation does not
/// manage them: a write into such a slot is accepted without a claim, which
/// is what free-form categories rely on since they never read availability.
///
/// Clones share all state.
#[derive(Clone, Default)]
pub struct InMemorySource {
    capacity: Arc<DashMap<SlotKey, u32>>,
    bookings: Arc<DashMap<String, Booking>>,
    subscriptions: Arc<DashMap<String, Subscription>>,
    calls: Arc<CallCounters>,
    fail_mutations: Arc<AtomicBool>,
    fail_fetches: Arc<AtomicBool>,
    mutation_delay: Option<Duration>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every mutation, keeping it in flight long enough to observe.
    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = Some(delay);
        self
    }

    pub fn set_capacity(&self, category: ServiceCategory, date: NaiveDate, slot: TimeSlot, n: u32) {
        self.capacity.insert((category, date, slot), n);
    }

    pub fn remaining(&self, category: ServiceCategory, date: NaiveDate, slot: TimeSlot) -> u32 {
        self.capacity
            .get(&(category, date, slot))
            .map(|n| *n)
            .unwrap_or(0)
    }

    /// Take one unit of capacity, as another client booking the slot would.
    ///
    /// Returns false if nothing was left to take.
    pub fn claim(&self, category: ServiceCategory, date: NaiveDate, slot: TimeSlot) -> bool {
        match self.capacity.get_mut(&(category, date, slot)) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn release(&self, key: SlotKey) {
        if let Some(mut remaining) = self.capacity.get_mut(&key) {
            *remaining += 1;
        }
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id.clone(), booking);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions.insert(subscription.id.clone(), subscription);
    }

    pub fn booking(&self, id: &str) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.clone())
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.get(id).map(|s| s.clone())
    }

    /// Make every following mutation fail until switched off.
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Make every following availability fetch fail until switched off.
    /// Slot re-checks are not affected.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            availability_fetches: self.calls.availability_fetches.load(Ordering::SeqCst),
            slot_checks: self.calls.slot_checks.load(Ordering::SeqCst),
            reschedule_mutations: self.calls.reschedule_mutations.load(Ordering::SeqCst),
            status_mutations: self.calls.status_mutations.load(Ordering::SeqCst),
        }
    }

    async fn before_mutation(&self) -> Result<()> {
        if let Some(delay) = self.mutation_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(Error::MutationFailure("injected failure".to_string()));
        }
        Ok(())
    }
}

impl SchedulingSource for InMemorySource {
    async fn fetch_availability(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category: ServiceCategory,
    ) -> Result<Vec<DateAvailability>> {
        self.calls.availability_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(Error::SourceError("injected fetch failure".to_string()));
        }

        let dates = start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|date| DateAvailability {
                date,
                slots: TimeSlot::ALL
                    .into_iter()
                    .map(|slot| {
                        let remaining = self.remaining(category, date, slot);
                        SlotAvailability {
                            slot,
                            is_available: remaining > 0,
                            remaining: Some(remaining),
                        }
                    })
                    .collect(),
            })
            .collect();

        Ok(dates)
    }

    async fn check_slot_availability(
        &self,
        date: NaiveDate,
        slot: TimeSlot,
        category: ServiceCategory,
    ) -> Result<SlotCheck> {
        self.calls.slot_checks.fetch_add(1, Ordering::SeqCst);
        Ok(SlotCheck {
            is_available: self.remaining(category, date, slot) > 0,
        })
    }

    async fn mutate_booking_reschedule(
        &self,
        booking_id: &str,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> Result<Booking> {
        self.calls.reschedule_mutations.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;

        let mut booking = self
            .bookings
            .get_mut(booking_id)
            .ok_or_else(|| Error::MutationFailure(format!("booking {} not found", booking_id)))?;

        if StatusTransitionTable::booking(booking.status, Action::Reschedule).is_none() {
            return Err(Error::MutationFailure(format!(
                "booking {} cannot be rescheduled while {}",
                booking_id,
                booking.status.label()
            )));
        }

        let new_key = (booking.category, date, slot);
        if self.capacity.contains_key(&new_key) && !self.claim(booking.category, date, slot) {
            return Err(Error::SlotNoLongerAvailable { date, slot });
        }
        self.release((booking.category, booking.date, booking.time_slot));

        booking.date = date;
        booking.time_slot = slot;
        Ok(booking.clone())
    }

    async fn mutate_booking_status(
        &self,
        booking_id: &str,
        change: &StatusChange,
    ) -> Result<Booking> {
        self.calls.status_mutations.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;

        let mut booking = self
            .bookings
            .get_mut(booking_id)
            .ok_or_else(|| Error::MutationFailure(format!("booking {} not found", booking_id)))?;

        let next = StatusTransitionTable::booking(booking.status, change.action).ok_or_else(|| {
            Error::MutationFailure(format!(
                "booking {} rejected {} while {}",
                booking_id,
                change.action,
                booking.status.label()
            ))
        })?;

        booking.status = next;
        Ok(booking.clone())
    }

    async fn mutate_subscription_status(
        &self,
        subscription_id: &str,
        change: &StatusChange,
    ) -> Result<Subscription> {
        self.calls.status_mutations.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;

        let mut subscription = self.subscriptions.get_mut(subscription_id).ok_or_else(|| {
            Error::MutationFailure(format!("subscription {} not found", subscription_id))
        })?;

        let next = StatusTransitionTable::subscription(subscription.status, change.action)
            .ok_or_else(|| {
                Error::MutationFailure(format!(
                    "subscription {} rejected {} while {}",
                    subscription_id,
                    change.action,
                    subscription.status.label()
                ))
            })?;

        subscription.status = next;
        if let Some(date) = change.next_billing_date {
            subscription.next_billing_date = Some(date);
        }
        Ok(subscription.clone())
    }
}
