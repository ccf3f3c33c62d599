//! Scheduling policy: the tunable constants of the engine.
//!
//! All fields have defaults, so a policy can be built in code or loaded from
//! a partial JSON document:
//!
//! ```
//! use booking_kit::policy::SchedulingPolicy;
//! use booking_kit::model::ServiceCategory;
//!
//! let policy = SchedulingPolicy::from_json(r#"{ "horizonDays": 14 }"#).unwrap();
//! assert_eq!(policy.horizon_days, 14);
//! assert!(policy.is_free_form(ServiceCategory::Cooking));
//! ```

use crate::error::{Error, Result};
use crate::model::ServiceCategory;
use crate::strategy::FetchConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How dates and times are picked for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    /// Pick from the three slots, governed by live availability.
    Slotted,
    /// Free date/time entry with no availability lookup.
    FreeForm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulingPolicy {
    /// Last bookable day, counted from today. The first is always tomorrow.
    pub horizon_days: u32,

    /// Categories that skip slot availability entirely.
    pub free_form_categories: Vec<ServiceCategory>,

    /// Days per month when a subscription has a duration but no end date.
    ///
    /// A fixed approximation; drifts from calendar months over long terms.
    pub nominal_month_days: u32,

    /// How long a success confirmation stays on screen. Display hint only.
    pub success_dismiss_after_ms: u64,

    /// Retries for availability reads. Mutations are never retried.
    pub fetch_retry_count: u32,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy {
            horizon_days: 30,
            free_form_categories: vec![ServiceCategory::Cooking, ServiceCategory::Laundry],
            nominal_month_days: 30,
            success_dismiss_after_ms: 3000,
            fetch_retry_count: 2,
        }
    }
}

impl SchedulingPolicy {
    /// Parse and validate a policy from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: SchedulingPolicy =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// # Errors
    ///
    /// Returns `Error::ConfigError` for a zero horizon or zero-length month.
    pub fn validate(&self) -> Result<()> {
        if self.horizon_days == 0 {
            return Err(Error::ConfigError(
                "horizonDays must be at least 1".to_string(),
            ));
        }
        if self.nominal_month_days == 0 {
            return Err(Error::ConfigError(
                "nominalMonthDays must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    pub fn with_free_form_categories(mut self, categories: Vec<ServiceCategory>) -> Self {
        self.free_form_categories = categories;
        self
    }

    pub fn with_nominal_month_days(mut self, days: u32) -> Self {
        self.nominal_month_days = days;
        self
    }

    pub fn with_fetch_retry_count(mut self, count: u32) -> Self {
        self.fetch_retry_count = count;
        self
    }

    pub fn mode(&self, category: ServiceCategory) -> SchedulingMode {
        if self.free_form_categories.contains(&category) {
            SchedulingMode::FreeForm
        } else {
            SchedulingMode::Slotted
        }
    }

    pub fn is_free_form(&self, category: ServiceCategory) -> bool {
        self.mode(category) == SchedulingMode::FreeForm
    }

    pub fn success_dismiss_after(&self) -> Duration {
        Duration::from_millis(self.success_dismiss_after_ms)
    }

    /// Read-side fetch settings derived from this policy.
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default().with_retry(self.fetch_retry_count)
    }
}
