//! Metrics hooks for engine events.
//!
//! Implement [`EngineMetrics`] to forward engine events to your monitoring
//! system. Every hook has a default that logs through the `log` crate, so an
//! implementation only overrides what it counts:
//!
//! ```ignore
//! use booking_kit::observability::EngineMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl EngineMetrics for PrometheusMetrics {
//!     fn record_slot_conflict(&self, key: &str) {
//!         // counter!("slot_conflicts").inc();
//!     }
//! }
//! ```
//!
//! [`NoOpMetrics`] silences everything; [`LogMetrics`] keeps the defaults.

use std::time::Duration;

/// Trait for engine metrics collection.
///
/// `subject` strings are entity ids; `key` strings are snapshot keys or
/// `date:slot:category` triples.
pub trait EngineMetrics: Send + Sync {
    /// A status transition was applied to local state.
    fn record_transition(&self, subject: &str, from: &str, to: &str) {
        debug!("Transition {}: {} -> {}", subject, from, to);
    }

    /// An availability snapshot was fetched from the source.
    fn record_snapshot_fetch(&self, key: &str, duration: Duration) {
        debug!("Snapshot FETCH {} took {:?}", key, duration);
    }

    /// A slot re-check found the slot already taken.
    fn record_slot_conflict(&self, key: &str) {
        warn!("Slot conflict on {}", key);
    }

    /// A mutation completed successfully.
    fn record_mutation(&self, subject: &str, action: &str, duration: Duration) {
        debug!("Mutation {} on {} took {:?}", action, subject, duration);
    }

    /// A mutation failed.
    fn record_mutation_failure(&self, subject: &str, action: &str, error: &str) {
        warn!("Mutation {} on {} failed: {}", action, subject, error);
    }

    /// An illegal action reached the engine.
    fn record_illegal_transition(&self, subject: &str, error: &str) {
        error!("Illegal transition on {}: {}", subject, error);
    }

    /// The source returned a status other than the one the table predicts.
    fn record_contract_violation(&self, subject: &str, expected: &str, actual: &str) {
        error!(
            "Contract violation on {}: expected {}, source returned {}",
            subject, expected, actual
        );
    }
}

/// Metrics implementation that only logs (the trait defaults).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl EngineMetrics for LogMetrics {}

/// Metrics implementation that discards every event.
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl EngineMetrics for NoOpMetrics {
    fn record_transition(&self, _subject: &str, _from: &str, _to: &str) {}
    fn record_snapshot_fetch(&self, _key: &str, _duration: Duration) {}
    fn record_slot_conflict(&self, _key: &str) {}
    fn record_mutation(&self, _subject: &str, _action: &str, _duration: Duration) {}
    fn record_mutation_failure(&self, _subject: &str, _action: &str, _error: &str) {}
    fn record_illegal_transition(&self, _subject: &str, _error: &str) {}
    fn record_contract_violation(&self, _subject: &str, _expected: &str, _actual: &str) {}
}
