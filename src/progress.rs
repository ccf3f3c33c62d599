//! Subscription progress and price aggregation.
//!
//! Read-only: nothing here touches the source or mutates a subscription.
//!
//! Progress is `round(clamp(elapsed / total, 0, 1) * 100)` where `total` is
//! `end_date - start_date`, or `duration` months of `nominal_month_days` each
//! when no end date is set. The nominal month is a fixed approximation and
//! drifts from calendar months over long terms (a 12 month term of 30 day
//! months is 360 days). Dates are taken at midnight UTC.

use crate::model::{BillingCycle, Subscription};
use crate::policy::SchedulingPolicy;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

/// Price of one bundled service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrice {
    pub service_id: String,
    pub name: String,
    pub price: u64,
}

/// Price totals of a subscription, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSummary {
    pub per_service: Vec<ServicePrice>,
    pub billing_cycle: BillingCycle,
    /// Charged once per billing cycle.
    pub per_cycle: u64,
    /// Billing cycles needed to cover `duration` months, rounded up.
    pub cycles_in_term: u32,
    pub term_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCalculator {
    nominal_month_days: u32,
}

impl Default for ProgressCalculator {
    fn default() -> Self {
        ProgressCalculator {
            nominal_month_days: 30,
        }
    }
}

impl ProgressCalculator {
    pub fn new(nominal_month_days: u32) -> Self {
        ProgressCalculator { nominal_month_days }
    }

    pub fn from_policy(policy: &SchedulingPolicy) -> Self {
        Self::new(policy.nominal_month_days)
    }

    /// Length of the subscription term.
    pub fn term_length(&self, subscription: &Subscription) -> Duration {
        match subscription.end_date {
            Some(end) => end.signed_duration_since(subscription.start_date),
            None => i64::from(subscription.duration)
                .checked_mul(i64::from(self.nominal_month_days))
                .and_then(Duration::try_days)
                .unwrap_or(Duration::MAX),
        }
    }

    /// Completion of the subscription term as a percentage in `[0, 100]`.
    ///
    /// 0 before (and at) the start date, 100 after (and at) the end date.
    /// Monotonic in `now`.
    pub fn progress(&self, subscription: &Subscription, now: DateTime<Utc>) -> u8 {
        let start = midnight(subscription.start_date);

        if let Some(end) = subscription.end_date {
            if now > midnight(end) {
                return 100;
            }
        }

        percent(start, self.term_length(subscription), now)
    }

    /// Completion of the current billing cycle.
    ///
    /// The cycle runs from the last billing date (or the start date) to the
    /// next billing date. `None` when no next billing date is set.
    pub fn cycle_progress(&self, subscription: &Subscription, now: DateTime<Utc>) -> Option<u8> {
        let next = subscription.next_billing_date?;
        let from = subscription
            .last_billing_date
            .unwrap_or(subscription.start_date);

        if now > midnight(next) {
            return Some(100);
        }
        Some(percent(midnight(from), next.signed_duration_since(from), now))
    }

    /// Per-service prices and cycle and term totals.
    pub fn price_summary(&self, subscription: &Subscription) -> PriceSummary {
        let per_service: Vec<ServicePrice> = subscription
            .subscription_services
            .iter()
            .map(|s| ServicePrice {
                service_id: s.id.clone(),
                name: s.name.clone(),
                price: s.price,
            })
            .collect();

        let per_cycle = subscription.computed_total();
        if per_cycle != subscription.total_price {
            warn!(
                "Subscription {} stores total {} but its services sum to {}",
                subscription.id, subscription.total_price, per_cycle
            );
        }

        let cycle_months = subscription.billing_cycle.months();
        let cycles_in_term = subscription.duration.div_ceil(cycle_months);

        PriceSummary {
            per_service,
            billing_cycle: subscription.billing_cycle,
            per_cycle,
            cycles_in_term,
            term_total: per_cycle.saturating_mul(u64::from(cycles_in_term)),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// `round(clamp(elapsed / total, 0, 1) * 100)`, rounding halves up.
fn percent(start: DateTime<Utc>, total: Duration, now: DateTime<Utc>) -> u8 {
    if now < start {
        return 0;
    }

    let total = total.num_seconds();
    if total <= 0 {
        return 100;
    }

    let elapsed = now.signed_duration_since(start).num_seconds().min(total);
    let rounded = (elapsed * 200 + total) / (2 * total);
    u8::try_from(rounded.clamp(0, 100)).unwrap_or(100)
}
