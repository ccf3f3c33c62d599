//! Slot availability over the scheduling window.
//!
//! The resolver never decides capacity itself: it forwards per-slot flags and
//! counts from the source, normalised to one entry per window date with all
//! three slots present. Whether a category uses slots at all is a policy
//! decision made by callers (see [`SchedulingPolicy::mode`](crate::policy::SchedulingPolicy::mode)).

use crate::error::{Error, InputField, Result};
use crate::key::SnapshotKey;
use crate::model::{Booking, BookingStatus, ServiceCategory, TimeSlot};
use crate::observability::EngineMetrics;
use crate::source::SchedulingSource;
use crate::strategy::FetchConfig;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Availability of one slot on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAvailability {
    pub slot: TimeSlot,
    pub is_available: bool,
    /// Remaining capacity, when the source reports counts.
    #[serde(default)]
    pub remaining: Option<u32>,
}

impl SlotAvailability {
    pub fn unavailable(slot: TimeSlot) -> Self {
        SlotAvailability {
            slot,
            is_available: false,
            remaining: Some(0),
        }
    }

    /// Bookable: flagged available and not reporting zero remaining.
    pub fn is_bookable(&self) -> bool {
        self.is_available && self.remaining != Some(0)
    }

    fn merge(self, other: SlotAvailability) -> SlotAvailability {
        let remaining = match (self.remaining, other.remaining) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        SlotAvailability {
            slot: self.slot,
            is_available: self.is_available && other.is_available,
            remaining,
        }
    }
}

/// Availability of every slot on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateAvailability {
    pub date: NaiveDate,
    pub slots: Vec<SlotAvailability>,
}

impl DateAvailability {
    pub fn unavailable(date: NaiveDate) -> Self {
        DateAvailability {
            date,
            slots: TimeSlot::ALL
                .into_iter()
                .map(SlotAvailability::unavailable)
                .collect(),
        }
    }

    pub fn slot(&self, slot: TimeSlot) -> Option<&SlotAvailability> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    pub fn is_available(&self, slot: TimeSlot) -> bool {
        self.slot(slot).is_some_and(|s| s.is_bookable())
    }

    /// Bookable slots in wall-clock order. Empty when the date is full.
    pub fn available_slots(&self) -> Vec<TimeSlot> {
        TimeSlot::ALL
            .into_iter()
            .filter(|slot| self.is_available(*slot))
            .collect()
    }
}

/// Range of dates a booking may be moved to.
///
/// Starts tomorrow: same-day rescheduling is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SchedulingWindow {
    /// `[today + 1, today + horizon_days]`.
    pub fn from_today(today: NaiveDate, horizon_days: u32) -> Self {
        let start = today.checked_add_days(Days::new(1)).unwrap_or(today);
        let end = today
            .checked_add_days(Days::new(u64::from(horizon_days.max(1))))
            .unwrap_or(start);
        SchedulingWindow { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// # Errors
    ///
    /// Returns `Error::ValidationError` on the date field when `date` is outside the window.
    pub fn check(&self, date: NaiveDate) -> Result<()> {
        if date < self.start {
            return Err(Error::validation(
                InputField::Date,
                format!("{} is too early; the earliest date is {}", date, self.start),
            ));
        }
        if date > self.end {
            return Err(Error::validation(
                InputField::Date,
                format!("{} is too far out; the latest date is {}", date, self.end),
            ));
        }
        Ok(())
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }

    pub fn key(&self, category: ServiceCategory) -> SnapshotKey {
        SnapshotKey::new(category, self.start, self.end)
    }
}

/// Point-in-time availability for one key. Subject to staleness.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySnapshot {
    pub key: SnapshotKey,
    pub dates: Vec<DateAvailability>,
}

impl AvailabilitySnapshot {
    pub fn date(&self, date: NaiveDate) -> Option<&DateAvailability> {
        self.dates.iter().find(|d| d.date == date)
    }

    pub fn available_slots(&self, date: NaiveDate) -> Vec<TimeSlot> {
        self.date(date)
            .map(DateAvailability::available_slots)
            .unwrap_or_default()
    }

    pub fn is_available(&self, date: NaiveDate, slot: TimeSlot) -> bool {
        self.date(date).is_some_and(|d| d.is_available(slot))
    }

    /// Dates with at least one bookable slot.
    pub fn bookable_dates(&self) -> Vec<NaiveDate> {
        self.dates
            .iter()
            .filter(|d| !d.available_slots().is_empty())
            .map(|d| d.date)
            .collect()
    }
}

/// Resolves per-date, per-slot availability for a scheduling window.
#[derive(Debug, Clone)]
pub struct SlotAvailabilityResolver {
    window: SchedulingWindow,
    config: FetchConfig,
}

impl SlotAvailabilityResolver {
    pub fn new(window: SchedulingWindow, config: FetchConfig) -> Self {
        SlotAvailabilityResolver { window, config }
    }

    pub fn window(&self) -> &SchedulingWindow {
        &self.window
    }

    /// Normalise upstream rows onto the window.
    ///
    /// Pure. Yields exactly one entry per window date, each with all three
    /// slots in wall-clock order. Dates the source omitted are fully
    /// unavailable; dates outside the window are dropped. When the source
    /// repeats a date or slot the rows are merged conservatively: available
    /// only if every row says so, with the smallest remaining count.
    pub fn resolve(&self, upstream: &[DateAvailability]) -> Vec<DateAvailability> {
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<TimeSlot, SlotAvailability>> =
            BTreeMap::new();

        for row in upstream.iter().filter(|r| self.window.contains(r.date)) {
            let slots = by_date.entry(row.date).or_default();
            for slot in &row.slots {
                slots
                    .entry(slot.slot)
                    .and_modify(|existing| *existing = existing.merge(*slot))
                    .or_insert(*slot);
            }
        }

        self.window
            .dates()
            .map(|date| match by_date.get(&date) {
                Some(slots) => DateAvailability {
                    date,
                    slots: TimeSlot::ALL
                        .into_iter()
                        .map(|slot| {
                            slots
                                .get(&slot)
                                .copied()
                                .unwrap_or_else(|| SlotAvailability::unavailable(slot))
                        })
                        .collect(),
                },
                None => DateAvailability::unavailable(date),
            })
            .collect()
    }

    /// Fetch availability for `category` from the source and resolve it.
    ///
    /// # Errors
    ///
    /// Returns `Error::SourceError` once all retries are exhausted.
    pub async fn fetch<S: SchedulingSource>(
        &self,
        source: &S,
        category: ServiceCategory,
        metrics: &dyn EngineMetrics,
    ) -> Result<AvailabilitySnapshot> {
        let key = self.window.key(category);
        let timer = Instant::now();
        debug!("» Fetching availability snapshot {}", key);

        let upstream = with_retry(&self.config, "fetch_availability", move || {
            source.fetch_availability(self.window.start, self.window.end, category)
        })
        .await?;

        metrics.record_snapshot_fetch(&key.to_string(), timer.elapsed());

        Ok(AvailabilitySnapshot {
            key,
            dates: self.resolve(&upstream),
        })
    }

    /// Live check of one slot, bypassing any snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::SourceError` once all retries are exhausted.
    pub async fn check_slot<S: SchedulingSource>(
        &self,
        source: &S,
        date: NaiveDate,
        slot: TimeSlot,
        category: ServiceCategory,
    ) -> Result<bool> {
        let check = with_retry(&self.config, "check_slot_availability", move || {
            source.check_slot_availability(date, slot, category)
        })
        .await?;
        Ok(check.is_available)
    }
}

/// Run a read-side call, retrying with exponential backoff.
async fn with_retry<T, F, Fut>(config: &FetchConfig, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.retry_count + 1;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempts >= max_attempts {
                    return Err(e.into_source_error());
                }

                debug!(
                    "{} failed (attempt {}/{}): {}, retrying...",
                    operation, attempts, max_attempts, e
                );
                tokio::time::sleep(config.delay_for(attempts)).await;
            }
        }
    }
}

/// Snapshot held by one reschedule flow.
#[derive(Debug, Default, Clone)]
pub struct AvailabilityCache {
    current: Option<Arc<AvailabilitySnapshot>>,
}

impl AvailabilityCache {
    /// The cached snapshot, if it was taken for `key`.
    pub fn get(&self, key: &SnapshotKey) -> Option<Arc<AvailabilitySnapshot>> {
        self.current.as_ref().filter(|s| s.key == *key).cloned()
    }

    /// The cached snapshot regardless of key.
    pub fn current(&self) -> Option<Arc<AvailabilitySnapshot>> {
        self.current.clone()
    }

    pub fn store(&mut self, snapshot: AvailabilitySnapshot) -> Arc<AvailabilitySnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn invalidate(&mut self) {
        if let Some(snapshot) = self.current.take() {
            debug!("✓ Snapshot invalidated for {}", snapshot.key);
        }
    }
}

/// Two or more live bookings holding the same staff member in one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffConflict {
    pub staff_id: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub booking_ids: Vec<String>,
}

/// Find staff double-bookings among `bookings`.
///
/// Cancelled bookings and bookings without assigned staff are ignored.
/// Results are ordered by staff, date and slot.
pub fn detect_staff_conflicts(bookings: &[Booking]) -> Vec<StaffConflict> {
    let mut groups: BTreeMap<(&str, NaiveDate, TimeSlot), Vec<String>> = BTreeMap::new();

    for booking in bookings {
        if booking.status == BookingStatus::Cancelled {
            continue;
        }
        if let Some(staff) = booking.staff_id.as_deref() {
            groups
                .entry((staff, booking.date, booking.time_slot))
                .or_default()
                .push(booking.id.clone());
        }
    }

    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((staff, date, slot), booking_ids)| StaffConflict {
            staff_id: staff.to_string(),
            date,
            slot,
            booking_ids,
        })
        .collect()
}
