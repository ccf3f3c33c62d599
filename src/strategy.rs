//! Snapshot reuse strategies and read-side fetch settings.
//!
//! An availability snapshot may be reused for the lifetime of one reschedule
//! flow, but it is a point-in-time read and goes stale. The strategy makes the
//! choice between reuse and refetch explicit at every call site.
//!
//! | Strategy       | Cached snapshot for key | No snapshot | Use case |
//! |----------------|-------------------------|-------------|----------|
//! | **Reuse**      | Return it               | Fetch       | Opening a flow, re-rendering options |
//! | **Invalidate** | Drop and fetch          | Fetch       | After a lost slot race |

use std::time::Duration;

/// Strategy controlling whether a cached availability snapshot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SnapshotStrategy {
    /// Use the flow's snapshot if it covers the requested key, else fetch.
    #[default]
    Reuse,

    /// Discard any snapshot and fetch from the source.
    ///
    /// Required after `SlotNoLongerAvailable`: the old snapshot is known wrong.
    Invalidate,
}

impl std::fmt::Display for SnapshotStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotStrategy::Reuse => write!(f, "Reuse"),
            SnapshotStrategy::Invalidate => write!(f, "Invalidate"),
        }
    }
}

/// Settings for read-side collaborator calls.
///
/// Only availability fetches and slot checks are retried. A mutation is
/// never retried by the engine: a timed-out claim may still have landed.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Number of retry attempts (0 = no retry).
    pub retry_count: u32,

    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            retry_count: 0,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl FetchConfig {
    pub fn with_retry(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
