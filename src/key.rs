//! Identity of an availability snapshot.

use crate::model::ServiceCategory;
use chrono::NaiveDate;
use std::fmt;

/// One (date range, category) availability read.
///
/// Two snapshots are interchangeable only when their keys are equal.
/// Renders as `availability:{category}:{start}:{end}` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub category: ServiceCategory,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SnapshotKey {
    pub const PREFIX: &'static str = "availability";

    pub fn new(category: ServiceCategory, start: NaiveDate, end: NaiveDate) -> Self {
        SnapshotKey {
            category,
            start,
            end,
        }
    }

    /// Whether `date` falls inside the key's inclusive range.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            Self::PREFIX,
            self.category,
            self.start,
            self.end
        )
    }
}
