//! High-level scheduling service.
//!
//! Bundles the source, policy and metrics behind `Arc`s so one instance can
//! be cloned into every handler and open independent flows.

use crate::action::{ActionConfirmationFlow, ActionTarget};
use crate::availability::{AvailabilitySnapshot, SchedulingWindow, SlotAvailabilityResolver};
use crate::error::Result;
use crate::model::{Booking, ServiceCategory, Subscription};
use crate::observability::{EngineMetrics, LogMetrics};
use crate::policy::SchedulingPolicy;
use crate::progress::{PriceSummary, ProgressCalculator};
use crate::reschedule::RescheduleValidator;
use crate::source::SchedulingSource;
use crate::transition::{Action, StatusTransitionTable};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use std::sync::Arc;

/// Entry point for UI consumers.
///
/// Every flow it opens owns its own selection state, so two views of the
/// same booking never share a half-finished selection.
///
/// # Example
///
/// ```ignore
/// use booking_kit::{SchedulingService, source::InMemorySource};
///
/// let service = SchedulingService::new(InMemorySource::new());
///
/// let flow = service.open_reschedule(booking, today).await?;
/// flow.select_date(tomorrow)?;
/// flow.select_time(TimeSlot::Morning)?;
/// let outcome = flow.confirm().await?;
/// ```
pub struct SchedulingService<S: SchedulingSource> {
    source: Arc<S>,
    policy: Arc<SchedulingPolicy>,
    metrics: Arc<dyn EngineMetrics>,
}

impl<S: SchedulingSource> Clone for SchedulingService<S> {
    fn clone(&self) -> Self {
        SchedulingService {
            source: Arc::clone(&self.source),
            policy: Arc::clone(&self.policy),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: SchedulingSource> SchedulingService<S> {
    /// Create a service with the default policy and log-backed metrics.
    pub fn new(source: S) -> Self {
        SchedulingService {
            source: Arc::new(source),
            policy: Arc::new(SchedulingPolicy::default()),
            metrics: Arc::new(LogMetrics),
        }
    }

    /// Replace the policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the policy does not validate.
    pub fn with_policy(mut self, policy: SchedulingPolicy) -> Result<Self> {
        policy.validate()?;
        self.policy = Arc::new(policy);
        Ok(self)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// User-triggerable actions for a booking, for enabling buttons.
    pub fn booking_actions(&self, booking: &Booking) -> Vec<Action> {
        StatusTransitionTable::allowed_actions(booking.status.into())
    }

    /// User-triggerable actions for a subscription.
    pub fn subscription_actions(&self, subscription: &Subscription) -> Vec<Action> {
        StatusTransitionTable::allowed_actions(subscription.status.into())
    }

    /// Open a reschedule flow for `booking`.
    ///
    /// # Errors
    ///
    /// Same as [`RescheduleValidator::open`].
    pub async fn open_reschedule(
        &self,
        booking: Booking,
        today: NaiveDate,
    ) -> Result<RescheduleValidator<S>> {
        RescheduleValidator::open(
            booking,
            today,
            Arc::clone(&self.source),
            &self.policy,
            Arc::clone(&self.metrics),
        )
        .await
    }

    /// Open a confirmation flow for a status action.
    ///
    /// # Errors
    ///
    /// Same as [`ActionConfirmationFlow::start`].
    pub fn start_action(
        &self,
        action: Action,
        target: impl Into<ActionTarget>,
        today: NaiveDate,
    ) -> Result<ActionConfirmationFlow<S>> {
        ActionConfirmationFlow::start(
            action,
            target,
            today,
            Arc::clone(&self.source),
            Arc::clone(&self.metrics),
        )
    }

    pub fn progress(&self, subscription: &Subscription, now: DateTime<Utc>) -> u8 {
        ProgressCalculator::from_policy(&self.policy).progress(subscription, now)
    }

    pub fn cycle_progress(&self, subscription: &Subscription, now: DateTime<Utc>) -> Option<u8> {
        ProgressCalculator::from_policy(&self.policy).cycle_progress(subscription, now)
    }

    pub fn price_summary(&self, subscription: &Subscription) -> PriceSummary {
        ProgressCalculator::from_policy(&self.policy).price_summary(subscription)
    }

    /// Fetch availability snapshots for several categories concurrently.
    ///
    /// Free-form categories are skipped. Snapshots come back in input order.
    ///
    /// # Errors
    ///
    /// Returns the first `Error::SourceError` if any fetch fails.
    pub async fn prefetch_availability(
        &self,
        today: NaiveDate,
        categories: &[ServiceCategory],
    ) -> Result<Vec<AvailabilitySnapshot>> {
        let resolver = SlotAvailabilityResolver::new(
            SchedulingWindow::from_today(today, self.policy.horizon_days),
            self.policy.fetch_config(),
        );

        let fetches = categories
            .iter()
            .filter(|c| !self.policy.is_free_form(**c))
            .map(|c| resolver.fetch(self.source.as_ref(), *c, self.metrics.as_ref()));

        let snapshots = try_join_all(fetches).await?;
        debug!("✓ Prefetched {} availability snapshots", snapshots.len());
        Ok(snapshots)
    }
}
