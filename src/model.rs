//! Booking and subscription records as supplied by the data layer.
//!
//! Field names follow the camelCase payloads of the upstream API; status and
//! category enums use its SCREAMING_SNAKE_CASE spelling.

use crate::error::{Error, InputField, Result};
use chrono::{Months, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three fixed daily booking windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeSlot {
    /// 09:00 – 12:00
    Morning,
    /// 12:00 – 17:00
    Afternoon,
    /// 17:00 – 20:00
    Evening,
}

impl TimeSlot {
    /// All slots in wall-clock order.
    pub const ALL: [TimeSlot; 3] = [TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening];

    /// Wall-clock bounds as a half-open `[start, end)` range.
    pub fn bounds(&self) -> (NaiveTime, NaiveTime) {
        let (start, end) = match self {
            TimeSlot::Morning => (9, 12),
            TimeSlot::Afternoon => (12, 17),
            TimeSlot::Evening => (17, 20),
        };
        (hour(start), hour(end))
    }

    /// Slot whose window contains `time`, if any.
    pub fn containing(time: NaiveTime) -> Option<TimeSlot> {
        TimeSlot::ALL.into_iter().find(|slot| {
            let (start, end) = slot.bounds();
            time >= start && time < end
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "Morning (9:00 AM - 12:00 PM)",
            TimeSlot::Afternoon => "Afternoon (12:00 PM - 5:00 PM)",
            TimeSlot::Evening => "Evening (5:00 PM - 8:00 PM)",
        }
    }
}

fn hour(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap_or_default()
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSlot::Morning => write!(f, "Morning"),
            TimeSlot::Afternoon => write!(f, "Afternoon"),
            TimeSlot::Evening => write!(f, "Evening"),
        }
    }
}

/// Service category offered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCategory {
    Cleaning,
    Cooking,
    Laundry,
    Plumbing,
    Electrical,
    Gardening,
    PestControl,
    Maintenance,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Cleaning => "cleaning",
            ServiceCategory::Cooking => "cooking",
            ServiceCategory::Laundry => "laundry",
            ServiceCategory::Plumbing => "plumbing",
            ServiceCategory::Electrical => "electrical",
            ServiceCategory::Gardening => "gardening",
            ServiceCategory::PestControl => "pest_control",
            ServiceCategory::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual tone a status badge is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Neutral,
    Info,
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Paused,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Paused,
    ];

    /// Completed and Cancelled bookings admit no further action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn tone(&self) -> StatusTone {
        match self {
            BookingStatus::Pending => StatusTone::Warning,
            BookingStatus::Confirmed => StatusTone::Success,
            BookingStatus::InProgress => StatusTone::Info,
            BookingStatus::Completed => StatusTone::Neutral,
            BookingStatus::Cancelled => StatusTone::Danger,
            BookingStatus::Paused => StatusTone::Warning,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::InProgress => "In Progress",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Paused => "Paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
    Pending,
    Suspended,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 6] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Paused,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::Expired,
        SubscriptionStatus::Pending,
        SubscriptionStatus::Suspended,
    ];

    pub fn tone(&self) -> StatusTone {
        match self {
            SubscriptionStatus::Active => StatusTone::Success,
            SubscriptionStatus::Paused => StatusTone::Warning,
            SubscriptionStatus::Cancelled => StatusTone::Danger,
            SubscriptionStatus::Expired => StatusTone::Neutral,
            SubscriptionStatus::Pending => StatusTone::Info,
            SubscriptionStatus::Suspended => StatusTone::Danger,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "Active",
            SubscriptionStatus::Paused => "Paused",
            SubscriptionStatus::Cancelled => "Cancelled",
            SubscriptionStatus::Expired => "Expired",
            SubscriptionStatus::Pending => "Pending",
            SubscriptionStatus::Suspended => "Suspended",
        }
    }
}

/// Recurring period at which a subscription is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Annually,
}

impl BillingCycle {
    /// Calendar months covered by one cycle.
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::Annually => 12,
        }
    }

    /// `date` moved forward by one cycle, clamped to month end.
    ///
    /// Never applied implicitly: reactivation takes an explicit next
    /// billing date and callers may use this to suggest one.
    pub fn advance(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.checked_add_months(Months::new(self.months()))
    }
}

/// How often a bundled service is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

/// A service bundled into a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionService {
    pub id: String,
    pub name: String,
    pub category: ServiceCategory,
    /// Price per billing cycle, in minor currency units.
    pub price: u64,
    pub frequency: ServiceFrequency,
    #[serde(default)]
    pub scheduled_days: Vec<Weekday>,
}

/// A recurring bundle of services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub subscription_services: Vec<SubscriptionService>,
    pub billing_cycle: BillingCycle,
    /// Sum of all service prices, in minor currency units.
    pub total_price: u64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Term length in months, used when `end_date` is absent.
    pub duration: u32,
    #[serde(default)]
    pub next_billing_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_billing_date: Option<NaiveDate>,
    pub auto_renew: bool,
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// Sum of the bundled service prices.
    pub fn computed_total(&self) -> u64 {
        self.subscription_services.iter().map(|s| s.price).sum()
    }

    /// Check the bundle is non-empty and the stored total matches its services.
    pub fn validate(&self) -> Result<()> {
        if self.subscription_services.is_empty() {
            return Err(Error::validation(
                InputField::Subscription,
                format!("subscription {} has no services", self.id),
            ));
        }

        let computed = self.computed_total();
        if computed != self.total_price {
            return Err(Error::validation(
                InputField::Subscription,
                format!(
                    "subscription {} total {} does not match service sum {}",
                    self.id, self.total_price, computed
                ),
            ));
        }

        Ok(())
    }
}

/// A single scheduled visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub service_id: String,
    pub category: ServiceCategory,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub status: BookingStatus,
    #[serde(default)]
    pub staff_id: Option<String>,
    pub address: String,
    /// Total price in minor currency units.
    pub total_price: u64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
}
