//! Reschedule flow: date/time selection with a live re-check before commit.
//!
//! ```text
//! NoDate ──select_date──▶ DateSelected ──select_time──▶ DateAndTimeSelected
//!                                                              │ confirm
//!                                                              ▼
//!                                                          Confirming ──▶ Succeeded
//!                                                              │
//!                              slot lost or mutation failed ──▶ Failed
//! ```
//!
//! The snapshot fetched when the flow opens is only used to offer options.
//! On confirm the chosen slot is checked again against the live source,
//! because another client may have taken it in the meantime. A lost race
//! lands in `Failed` with `SlotNoLongerAvailable`: the snapshot is
//! invalidated and refetched, the date kept and the time cleared, so the
//! next `select_time` returns the flow to `DateAndTimeSelected`. After a
//! plain mutation failure both selections are kept and `confirm()` may be
//! retried directly.
//!
//! If the refetch after a lost race fails too, the flow has no snapshot and
//! [`availability_stale`](RescheduleValidator::availability_stale) reports
//! it; time selection is refused until
//! [`refresh_availability`](RescheduleValidator::refresh_availability)
//! succeeds.
//!
//! Atomicity of the slot claim itself belongs to the source's reschedule
//! mutation; a claim it rejects is handled exactly like a failed re-check.

use crate::availability::{
    AvailabilityCache, AvailabilitySnapshot, SchedulingWindow, SlotAvailabilityResolver,
};
use crate::error::{Error, InputField, Result};
use crate::model::{Booking, BookingStatus, ServiceCategory, TimeSlot};
use crate::observability::EngineMetrics;
use crate::policy::{SchedulingMode, SchedulingPolicy};
use crate::source::SchedulingSource;
use crate::strategy::SnapshotStrategy;
use crate::transition::{ensure_legal, Action, EntityKind, Status};
use chrono::{NaiveDate, NaiveTime};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Where the flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReschedulePhase {
    NoDate,
    DateSelected,
    DateAndTimeSelected,
    Confirming,
    Succeeded,
    /// The slot was lost (time cleared) or the mutation failed (selections
    /// kept). `last_error()` tells which.
    Failed,
    Closed,
}

/// A committed reschedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Reschedule {
    /// The booking as returned by the source.
    pub booking: Booking,
    pub previous_status: BookingStatus,
    pub previous_date: NaiveDate,
    pub previous_slot: TimeSlot,
    /// Requested date and slot.
    pub date: NaiveDate,
    pub slot: TimeSlot,
}

impl Reschedule {
    /// The source changed the status, or stored a date or slot other than
    /// the one requested. Rescheduling preserves status.
    pub fn is_contract_violation(&self) -> bool {
        self.booking.status != self.previous_status
            || self.booking.date != self.date
            || self.booking.time_slot != self.slot
    }
}

struct RescheduleState {
    booking: Booking,
    phase: ReschedulePhase,
    date: Option<NaiveDate>,
    slot: Option<TimeSlot>,
    last_error: Option<Error>,
    outcome: Option<Reschedule>,
    cache: AvailabilityCache,
    close_requested: bool,
}

impl RescheduleState {
    fn ensure_selectable(&self, field: InputField) -> Result<()> {
        match self.phase {
            ReschedulePhase::Closed | ReschedulePhase::Succeeded => Err(Error::FlowClosed),
            ReschedulePhase::Confirming => Err(Error::validation(
                field,
                "a confirmation is in progress; wait for it to finish",
            )),
            _ => Ok(()),
        }
    }

    fn reject(&mut self, err: Error) -> Error {
        self.last_error = Some(err.clone());
        err
    }

    fn finish(&mut self) {
        if self.close_requested {
            debug!("Applying deferred close for booking {}", self.booking.id);
            self.phase = ReschedulePhase::Closed;
        }
    }
}

/// Reschedule flow for one booking.
///
/// Each instance owns its selections, so several flows (for different
/// bookings, or the same one in two views) never interfere. Methods take
/// `&self`; the flow can be shared behind an `Arc` between the view that
/// renders it and the handler that confirms it.
pub struct RescheduleValidator<S: SchedulingSource> {
    source: Arc<S>,
    metrics: Arc<dyn EngineMetrics>,
    resolver: SlotAvailabilityResolver,
    mode: SchedulingMode,
    state: Mutex<RescheduleState>,
}

impl<S: SchedulingSource> RescheduleValidator<S> {
    /// Open a flow for `booking`, loading availability for slotted categories.
    ///
    /// # Errors
    ///
    /// - `Error::IllegalTransition`: the booking's status does not allow rescheduling
    /// - `Error::SourceError`: the initial availability fetch failed
    pub async fn open(
        booking: Booking,
        today: NaiveDate,
        source: Arc<S>,
        policy: &SchedulingPolicy,
        metrics: Arc<dyn EngineMetrics>,
    ) -> Result<Self> {
        if let Err(e) = ensure_legal(
            EntityKind::Booking,
            Status::Booking(booking.status),
            Action::Reschedule,
        ) {
            metrics.record_illegal_transition(&booking.id, &e.to_string());
            return Err(e);
        }

        let window = SchedulingWindow::from_today(today, policy.horizon_days);
        let validator = RescheduleValidator {
            source,
            metrics,
            resolver: SlotAvailabilityResolver::new(window, policy.fetch_config()),
            mode: policy.mode(booking.category),
            state: Mutex::new(RescheduleState {
                booking,
                phase: ReschedulePhase::NoDate,
                date: None,
                slot: None,
                last_error: None,
                outcome: None,
                cache: AvailabilityCache::default(),
                close_requested: false,
            }),
        };

        validator
            .refresh_availability(SnapshotStrategy::Reuse)
            .await?;

        Ok(validator)
    }

    fn state(&self) -> MutexGuard<'_, RescheduleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> ReschedulePhase {
        self.state().phase
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn window(&self) -> SchedulingWindow {
        *self.resolver.window()
    }

    pub fn booking(&self) -> Booking {
        self.state().booking.clone()
    }

    pub fn selected_date(&self) -> Option<NaiveDate> {
        self.state().date
    }

    pub fn selected_time(&self) -> Option<TimeSlot> {
        self.state().slot
    }

    /// Error from the last rejected input or confirmation, if not yet cleared.
    pub fn last_error(&self) -> Option<Error> {
        self.state().last_error.clone()
    }

    pub fn outcome(&self) -> Option<Reschedule> {
        self.state().outcome.clone()
    }

    /// Availability snapshot currently offered, for slotted categories.
    pub fn snapshot(&self) -> Option<Arc<AvailabilitySnapshot>> {
        self.state().cache.current()
    }

    pub fn can_confirm(&self) -> bool {
        let state = self.state();
        matches!(
            state.phase,
            ReschedulePhase::DateAndTimeSelected | ReschedulePhase::Failed
        ) && state.date.is_some()
            && state.slot.is_some()
    }

    /// A slotted flow whose snapshot is missing, because the refetch after a
    /// lost slot race failed. Cleared by a successful
    /// [`refresh_availability`](Self::refresh_availability).
    pub fn availability_stale(&self) -> bool {
        self.mode == SchedulingMode::Slotted && self.state().cache.current().is_none()
    }

    /// Time options for the selected date.
    ///
    /// Empty when no date is selected or the date has no free slot; a full
    /// date is not an error. Also empty while
    /// [`availability_stale`](Self::availability_stale). Free-form
    /// categories are offered every slot.
    pub fn time_options(&self) -> Vec<TimeSlot> {
        let state = self.state();
        let Some(date) = state.date else {
            return Vec::new();
        };

        match self.mode {
            SchedulingMode::FreeForm => TimeSlot::ALL.to_vec(),
            SchedulingMode::Slotted => state
                .cache
                .current()
                .map(|snapshot| snapshot.available_slots(date))
                .unwrap_or_default(),
        }
    }

    /// Load (or reload) the availability snapshot.
    ///
    /// Returns `None` for free-form categories, which have no snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::SourceError` if the fetch failed.
    pub async fn refresh_availability(
        &self,
        strategy: SnapshotStrategy,
    ) -> Result<Option<Arc<AvailabilitySnapshot>>> {
        if self.mode == SchedulingMode::FreeForm {
            return Ok(None);
        }

        let (key, category) = {
            let mut state = self.state();
            let category = state.booking.category;
            let key = self.resolver.window().key(category);

            match strategy {
                SnapshotStrategy::Reuse => {
                    if let Some(snapshot) = state.cache.get(&key) {
                        debug!("✓ Reusing snapshot {}", key);
                        return Ok(Some(snapshot));
                    }
                }
                SnapshotStrategy::Invalidate => state.cache.invalidate(),
            }
            (key, category)
        };

        let snapshot = self
            .resolver
            .fetch(self.source.as_ref(), category, self.metrics.as_ref())
            .await?;
        debug!("✓ Snapshot {} loaded ({} dates)", key, snapshot.dates.len());

        Ok(Some(self.state().cache.store(snapshot)))
    }

    /// Select a date, clearing any time selection.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError` (date): outside the scheduling window; the
    ///   current selections are left as they were
    /// - `Error::ValidationError` (date): a confirmation is in flight
    /// - `Error::FlowClosed`: the flow has finished or was closed
    pub fn select_date(&self, date: NaiveDate) -> Result<()> {
        let mut state = self.state();
        state.ensure_selectable(InputField::Date)?;

        if let Err(e) = self.resolver.window().check(date) {
            return Err(state.reject(e));
        }

        state.date = Some(date);
        state.slot = None;
        state.last_error = None;
        state.phase = ReschedulePhase::DateSelected;
        debug!("Booking {}: date {} selected", state.booking.id, date);
        Ok(())
    }

    /// Select a slot on the already selected date.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError` (date): no date selected yet
    /// - `Error::ValidationError` (time): the snapshot shows the slot taken,
    ///   no snapshot is loaded, or a confirmation is in flight
    /// - `Error::FlowClosed`: the flow has finished or was closed
    pub fn select_time(&self, slot: TimeSlot) -> Result<()> {
        let mut state = self.state();
        state.ensure_selectable(InputField::Time)?;

        let Some(date) = state.date else {
            return Err(state.reject(Error::validation(
                InputField::Date,
                "select a date before choosing a time",
            )));
        };

        if self.mode == SchedulingMode::Slotted {
            let Some(snapshot) = state.cache.current() else {
                return Err(state.reject(Error::validation(
                    InputField::Time,
                    "availability could not be refreshed; reload it before choosing a time",
                )));
            };
            if !snapshot.is_available(date, slot) {
                return Err(state.reject(Error::validation(
                    InputField::Time,
                    format!("{} is not available on {}", slot, date),
                )));
            }
        }

        state.slot = Some(slot);
        state.last_error = None;
        state.phase = ReschedulePhase::DateAndTimeSelected;
        debug!("Booking {}: {} {} selected", state.booking.id, date, slot);
        Ok(())
    }

    /// Enter a date and clock time directly, for free-form categories.
    ///
    /// The time is mapped to the slot whose window contains it.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError` (time): slotted category, or a time outside
    ///   every slot window
    /// - `Error::ValidationError` (date): outside the scheduling window
    pub fn enter_free_form(&self, date: NaiveDate, time: NaiveTime) -> Result<TimeSlot> {
        let mut state = self.state();
        state.ensure_selectable(InputField::Time)?;

        if self.mode != SchedulingMode::FreeForm {
            let err = Error::validation(
                InputField::Time,
                format!("{} bookings are scheduled by slot", state.booking.category),
            );
            return Err(state.reject(err));
        }

        if let Err(e) = self.resolver.window().check(date) {
            return Err(state.reject(e));
        }

        let Some(slot) = TimeSlot::containing(time) else {
            return Err(state.reject(Error::validation(
                InputField::Time,
                format!("{} is outside service hours (09:00-20:00)", time.format("%H:%M")),
            )));
        };

        state.date = Some(date);
        state.slot = Some(slot);
        state.last_error = None;
        state.phase = ReschedulePhase::DateAndTimeSelected;
        Ok(slot)
    }

    /// Re-check the chosen slot and commit the reschedule.
    ///
    /// Returns `Ok(None)` without side effects when a confirmation is already
    /// in flight or has already succeeded.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: date or time not selected yet
    /// - `Error::SlotNoLongerAvailable`: the slot was taken; the flow is
    ///   `Failed` with the date kept and the time cleared, and the snapshot
    ///   has been refetched (see [`availability_stale`](Self::availability_stale)
    ///   if that refetch failed)
    /// - `Error::MutationFailure`: the write failed; selections are kept
    /// - `Error::SourceError`: the re-check itself failed; selections are kept
    /// - `Error::FlowClosed`: the flow was closed
    pub async fn confirm(&self) -> Result<Option<Reschedule>> {
        let (booking_id, category, date, slot) = match self.begin() {
            Ok(selection) => selection,
            Err(Error::DuplicateRequest) => {
                debug!("Duplicate reschedule confirm ignored");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if self.mode == SchedulingMode::Slotted {
            match self
                .resolver
                .check_slot(self.source.as_ref(), date, slot, category)
                .await
            {
                Ok(true) => {}
                Ok(false) => return Err(self.slot_lost(date, slot).await),
                Err(e) => {
                    let mut state = self.state();
                    state.phase = ReschedulePhase::DateAndTimeSelected;
                    let err = state.reject(e);
                    state.finish();
                    return Err(err);
                }
            }
        }

        let timer = Instant::now();
        let result = self
            .source
            .mutate_booking_reschedule(&booking_id, date, slot)
            .await;

        match result {
            Ok(updated) => Ok(Some(self.succeeded(updated, date, slot, timer))),
            Err(Error::SlotNoLongerAvailable { .. }) => Err(self.slot_lost(date, slot).await),
            Err(e) => {
                let err = e.into_mutation_failure();
                self.metrics
                    .record_mutation_failure(&booking_id, Action::Reschedule.as_str(), &err.to_string());
                let mut state = self.state();
                state.phase = ReschedulePhase::Failed;
                let err = state.reject(err);
                state.finish();
                Err(err)
            }
        }
    }

    /// Enter `Confirming`, or explain why not.
    fn begin(&self) -> Result<(String, ServiceCategory, NaiveDate, TimeSlot)> {
        let mut state = self.state();

        match state.phase {
            ReschedulePhase::Confirming | ReschedulePhase::Succeeded => {
                return Err(Error::DuplicateRequest)
            }
            ReschedulePhase::Closed => return Err(Error::FlowClosed),
            ReschedulePhase::NoDate => {
                return Err(state.reject(Error::validation(
                    InputField::Date,
                    "select a date before confirming",
                )))
            }
            ReschedulePhase::DateSelected
            | ReschedulePhase::DateAndTimeSelected
            | ReschedulePhase::Failed => {}
        }

        let (Some(date), Some(slot)) = (state.date, state.slot) else {
            return Err(state.reject(Error::validation(
                InputField::Time,
                "select a time before confirming",
            )));
        };

        if let Err(e) = ensure_legal(
            EntityKind::Booking,
            Status::Booking(state.booking.status),
            Action::Reschedule,
        ) {
            self.metrics
                .record_illegal_transition(&state.booking.id, &e.to_string());
            return Err(state.reject(e));
        }

        state.phase = ReschedulePhase::Confirming;
        state.last_error = None;
        debug!(
            "» Confirming reschedule of {} to {} {}",
            state.booking.id, date, slot
        );
        Ok((state.booking.id.clone(), state.booking.category, date, slot))
    }

    async fn slot_lost(&self, date: NaiveDate, slot: TimeSlot) -> Error {
        let category = self.state().booking.category;
        self.metrics
            .record_slot_conflict(&format!("{}:{}:{}", date, slot, category));
        warn!(
            "✗ Reschedule failed: {} {} for {} was taken, refreshing availability",
            date, slot, category
        );

        if let Err(e) = self.refresh_availability(SnapshotStrategy::Invalidate).await {
            error!(
                "✗ Availability refresh after slot conflict failed, time selection blocked until reload: {}",
                e
            );
        }

        let mut state = self.state();
        state.slot = None;
        state.phase = ReschedulePhase::Failed;
        let err = state.reject(Error::SlotNoLongerAvailable { date, slot });
        state.finish();
        err
    }

    fn succeeded(
        &self,
        updated: Booking,
        date: NaiveDate,
        slot: TimeSlot,
        timer: Instant,
    ) -> Reschedule {
        let mut state = self.state();
        let previous = state.booking.clone();

        self.metrics
            .record_mutation(&previous.id, Action::Reschedule.as_str(), timer.elapsed());

        if updated.status != previous.status {
            error!(
                "Contract violation on {}: reschedule changed status {} -> {}",
                previous.id,
                previous.status.label(),
                updated.status.label()
            );
            self.metrics.record_contract_violation(
                &previous.id,
                previous.status.label(),
                updated.status.label(),
            );
        }
        if updated.date != date || updated.time_slot != slot {
            error!(
                "Contract violation on {}: requested {} {}, source stored {} {}",
                previous.id, date, slot, updated.date, updated.time_slot
            );
            self.metrics.record_contract_violation(
                &previous.id,
                &format!("{} {}", date, slot),
                &format!("{} {}", updated.date, updated.time_slot),
            );
        }

        let outcome = Reschedule {
            booking: updated.clone(),
            previous_status: previous.status,
            previous_date: previous.date,
            previous_slot: previous.time_slot,
            date,
            slot,
        };

        info!(
            "✓ Booking {} rescheduled from {} {} to {} {} in {:?}",
            previous.id,
            previous.date,
            previous.time_slot,
            date,
            slot,
            timer.elapsed()
        );

        state.booking = updated;
        state.outcome = Some(outcome.clone());
        state.phase = ReschedulePhase::Succeeded;
        state.finish();
        outcome
    }

    /// Close the flow.
    ///
    /// Before confirmation this discards every selection and returns `true`.
    /// While a confirmation is in flight the close is deferred: the mutation
    /// resolves, its result is applied, and only then is the flow closed.
    /// Returns `false` in that case.
    pub fn close(&self) -> bool {
        let mut state = self.state();

        if state.phase == ReschedulePhase::Confirming {
            debug!("Close of booking {} deferred until confirm resolves", state.booking.id);
            state.close_requested = true;
            return false;
        }

        state.date = None;
        state.slot = None;
        state.last_error = None;
        state.cache.invalidate();
        state.phase = ReschedulePhase::Closed;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::DateAvailability;
    use crate::model::Subscription;
    use crate::observability::NoOpMetrics;
    use crate::source::{InMemorySource, SlotCheck, StatusChange};
    use std::time::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn tomorrow() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
    }

    fn booking(category: ServiceCategory, status: BookingStatus) -> Booking {
        Booking {
            id: "bk_1".to_string(),
            service_id: "svc_1".to_string(),
            category,
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            time_slot: TimeSlot::Afternoon,
            status,
            staff_id: Some("staff_1".to_string()),
            address: "1 Main St".to_string(),
            total_price: 5000,
            notes: None,
            is_recurring: false,
        }
    }

    async fn open(
        source: &Arc<InMemorySource>,
        category: ServiceCategory,
    ) -> RescheduleValidator<InMemorySource> {
        let booking = booking(category, BookingStatus::Confirmed);
        source.insert_booking(booking.clone());
        RescheduleValidator::open(
            booking,
            today(),
            Arc::clone(source),
            &SchedulingPolicy::default(),
            Arc::new(NoOpMetrics),
        )
        .await
        .expect("Failed to open flow")
    }

    #[tokio::test]
    async fn test_open_rejects_paused_booking() {
        let source = Arc::new(InMemorySource::new());
        let result = RescheduleValidator::open(
            booking(ServiceCategory::Cleaning, BookingStatus::Paused),
            today(),
            source,
            &SchedulingPolicy::default(),
            Arc::new(NoOpMetrics),
        )
        .await;

        assert!(matches!(result, Err(Error::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn test_select_date_resets_time() {
        let source = Arc::new(InMemorySource::new());
        source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 1);
        let flow = open(&source, ServiceCategory::Cleaning).await;

        assert_eq!(flow.phase(), ReschedulePhase::NoDate);
        flow.select_date(tomorrow()).unwrap();
        flow.select_time(TimeSlot::Morning).unwrap();
        assert_eq!(flow.phase(), ReschedulePhase::DateAndTimeSelected);

        flow.select_date(tomorrow()).unwrap();
        assert_eq!(flow.phase(), ReschedulePhase::DateSelected);
        assert_eq!(flow.selected_time(), None);
        assert!(!flow.can_confirm());
    }

    #[tokio::test]
    async fn test_full_date_offers_no_times() {
        let source = Arc::new(InMemorySource::new());
        let flow = open(&source, ServiceCategory::Cleaning).await;

        flow.select_date(tomorrow()).unwrap();
        assert!(flow.time_options().is_empty());
        assert_eq!(flow.phase(), ReschedulePhase::DateSelected);

        let err = flow.select_time(TimeSlot::Morning).unwrap_err();
        assert_eq!(err.field(), Some(InputField::Time));
    }

    #[tokio::test]
    async fn test_same_day_rejected_and_selection_kept() {
        let source = Arc::new(InMemorySource::new());
        let flow = open(&source, ServiceCategory::Cleaning).await;

        flow.select_date(tomorrow()).unwrap();
        let err = flow.select_date(today()).unwrap_err();

        assert_eq!(err.field(), Some(InputField::Date));
        assert_eq!(flow.selected_date(), Some(tomorrow()));
        assert_eq!(flow.last_error(), Some(err));
    }

    #[tokio::test]
    async fn test_confirm_requires_time() {
        let source = Arc::new(InMemorySource::new());
        let flow = open(&source, ServiceCategory::Cleaning).await;
        flow.select_date(tomorrow()).unwrap();

        let err = flow.confirm().await.unwrap_err();
        assert_eq!(err.field(), Some(InputField::Time));
        assert_eq!(source.stats().reschedule_mutations, 0);
    }

    #[tokio::test]
    async fn test_free_form_entry() {
        let source = Arc::new(InMemorySource::new());
        let flow = open(&source, ServiceCategory::Cooking).await;

        assert_eq!(flow.mode(), SchedulingMode::FreeForm);
        assert!(flow.snapshot().is_none());
        assert_eq!(source.stats().availability_fetches, 0);

        let late = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        assert!(flow.enter_free_form(tomorrow(), late).is_err());

        let err = flow
            .enter_free_form(today(), NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .unwrap_err();
        assert_eq!(err.field(), Some(InputField::Date));

        let slot = flow
            .enter_free_form(tomorrow(), NaiveTime::from_hms_opt(13, 30, 0).unwrap())
            .unwrap();
        assert_eq!(slot, TimeSlot::Afternoon);

        let outcome = flow.confirm().await.unwrap().expect("Reschedule not applied");
        assert_eq!(outcome.slot, TimeSlot::Afternoon);
        assert_eq!(source.stats().slot_checks, 0);
    }

    #[tokio::test]
    async fn test_free_form_rejected_for_slotted_category() {
        let source = Arc::new(InMemorySource::new());
        let flow = open(&source, ServiceCategory::Cleaning).await;

        let err = flow
            .enter_free_form(tomorrow(), NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .unwrap_err();
        assert_eq!(err.field(), Some(InputField::Time));
    }

    #[tokio::test]
    async fn test_mutation_failure_keeps_selection() {
        let source = Arc::new(InMemorySource::new());
        source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Evening, 2);
        let flow = open(&source, ServiceCategory::Cleaning).await;

        flow.select_date(tomorrow()).unwrap();
        flow.select_time(TimeSlot::Evening).unwrap();

        source.fail_mutations(true);
        let err = flow.confirm().await.unwrap_err();
        assert!(matches!(err, Error::MutationFailure(_)));
        assert_eq!(flow.phase(), ReschedulePhase::Failed);
        assert_eq!(flow.selected_date(), Some(tomorrow()));
        assert_eq!(flow.selected_time(), Some(TimeSlot::Evening));

        source.fail_mutations(false);
        let outcome = flow.confirm().await.unwrap().expect("Retry not applied");
        assert_eq!(outcome.date, tomorrow());
        assert_eq!(flow.phase(), ReschedulePhase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_slot_with_failed_refetch_blocks_time_selection() {
        let source = Arc::new(InMemorySource::new());
        source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 1);
        source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Evening, 5);
        let flow = open(&source, ServiceCategory::Cleaning).await;

        flow.select_date(tomorrow()).unwrap();
        flow.select_time(TimeSlot::Morning).unwrap();
        source.fail_fetches(true);
        assert!(source.claim(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning));

        let err = flow.confirm().await.unwrap_err();
        assert!(matches!(err, Error::SlotNoLongerAvailable { .. }));
        assert_eq!(flow.phase(), ReschedulePhase::Failed);
        assert_eq!(flow.selected_date(), Some(tomorrow()));
        assert_eq!(flow.selected_time(), None);
        assert!(flow.availability_stale());

        let err = flow.select_time(TimeSlot::Evening).unwrap_err();
        match err {
            Error::ValidationError { field, message } => {
                assert_eq!(field, InputField::Time);
                assert!(message.contains("could not be refreshed"));
            }
            other => panic!("Unexpected error: {:?}", other),
        }

        source.fail_fetches(false);
        assert!(flow
            .refresh_availability(SnapshotStrategy::Reuse)
            .await
            .unwrap()
            .is_some());
        assert!(!flow.availability_stale());
        assert_eq!(flow.time_options(), vec![TimeSlot::Evening]);

        flow.select_time(TimeSlot::Evening).unwrap();
        assert_eq!(flow.phase(), ReschedulePhase::DateAndTimeSelected);
        let outcome = flow.confirm().await.unwrap().expect("Reschedule not applied");
        assert_eq!(outcome.slot, TimeSlot::Evening);
        assert!(!outcome.is_contract_violation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_rejected_while_confirming() {
        let source = Arc::new(
            InMemorySource::new().with_mutation_delay(Duration::from_millis(100)),
        );
        source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 2);
        let flow = open(&source, ServiceCategory::Cleaning).await;
        flow.select_date(tomorrow()).unwrap();
        flow.select_time(TimeSlot::Morning).unwrap();

        let (outcome, (date_err, time_err)) = tokio::join!(flow.confirm(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            (
                flow.select_date(tomorrow()).unwrap_err(),
                flow.select_time(TimeSlot::Morning).unwrap_err(),
            )
        });

        assert_eq!(date_err.field(), Some(InputField::Date));
        assert_eq!(time_err.field(), Some(InputField::Time));
        assert_ne!(date_err, Error::DuplicateRequest);
        assert!(outcome.unwrap().is_some());
        assert_eq!(flow.selected_time(), Some(TimeSlot::Morning));
    }

    /// Source that pauses the booking while rescheduling it.
    struct DriftingSource(InMemorySource);

    impl SchedulingSource for DriftingSource {
        async fn fetch_availability(
            &self,
            start: NaiveDate,
            end: NaiveDate,
            category: ServiceCategory,
        ) -> Result<Vec<DateAvailability>> {
            self.0.fetch_availability(start, end, category).await
        }

        async fn check_slot_availability(
            &self,
            date: NaiveDate,
            slot: TimeSlot,
            category: ServiceCategory,
        ) -> Result<SlotCheck> {
            self.0.check_slot_availability(date, slot, category).await
        }

        async fn mutate_booking_reschedule(
            &self,
            booking_id: &str,
            date: NaiveDate,
            slot: TimeSlot,
        ) -> Result<Booking> {
            let mut booking = self.0.mutate_booking_reschedule(booking_id, date, slot).await?;
            booking.status = BookingStatus::Paused;
            Ok(booking)
        }

        async fn mutate_booking_status(
            &self,
            booking_id: &str,
            change: &StatusChange,
        ) -> Result<Booking> {
            self.0.mutate_booking_status(booking_id, change).await
        }

        async fn mutate_subscription_status(
            &self,
            subscription_id: &str,
            change: &StatusChange,
        ) -> Result<Subscription> {
            self.0.mutate_subscription_status(subscription_id, change).await
        }
    }

    #[tokio::test]
    async fn test_reschedule_contract_violation_flagged() {
        let inner = InMemorySource::new();
        inner.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 1);
        let original = booking(ServiceCategory::Cleaning, BookingStatus::Confirmed);
        inner.insert_booking(original.clone());

        let flow = RescheduleValidator::open(
            original,
            today(),
            Arc::new(DriftingSource(inner)),
            &SchedulingPolicy::default(),
            Arc::new(NoOpMetrics),
        )
        .await
        .expect("Failed to open flow");
        flow.select_date(tomorrow()).unwrap();
        flow.select_time(TimeSlot::Morning).unwrap();

        let outcome = flow.confirm().await.unwrap().expect("Reschedule not applied");
        assert!(outcome.is_contract_violation());
        assert_eq!(outcome.previous_status, BookingStatus::Confirmed);
        assert_eq!(outcome.booking.status, BookingStatus::Paused);
        assert_eq!(flow.phase(), ReschedulePhase::Succeeded);
    }

    #[tokio::test]
    async fn test_close_before_confirm_discards() {
        let source = Arc::new(InMemorySource::new());
        source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 1);
        let flow = open(&source, ServiceCategory::Cleaning).await;

        flow.select_date(tomorrow()).unwrap();
        assert!(flow.close());
        assert_eq!(flow.phase(), ReschedulePhase::Closed);
        assert_eq!(flow.selected_date(), None);
        assert_eq!(flow.confirm().await.unwrap_err(), Error::FlowClosed);
        assert_eq!(source.stats().reschedule_mutations, 0);
    }
}
