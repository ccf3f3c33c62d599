//! Error types for the scheduling engine.

use crate::model::TimeSlot;
use crate::transition::{Action, Status};
use chrono::NaiveDate;
use std::fmt;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// User input a [`Error::ValidationError`] refers to.
///
/// UI consumers use this to highlight the offending field while keeping
/// every other selection intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    Date,
    Time,
    Reason,
    NextBillingDate,
    Action,
    Subscription,
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputField::Date => "date",
            InputField::Time => "time",
            InputField::Reason => "reason",
            InputField::NextBillingDate => "next billing date",
            InputField::Action => "action",
            InputField::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

/// Error types for the scheduling engine.
///
/// Every recoverable failure is returned to the caller as a value; only
/// [`Error::IllegalTransition`] indicates a defect in the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested action is not legal for the entity's current status.
    ///
    /// UI code is expected to prevent this by consulting
    /// [`StatusTransitionTable::allowed_actions`](crate::StatusTransitionTable::allowed_actions).
    /// Reaching the engine with one is a programmer error and is logged at
    /// `error` level. Checked before any external mutation is invoked.
    IllegalTransition { status: Status, action: Action },

    /// The slot was free when the snapshot was taken but another client
    /// claimed it before confirmation.
    ///
    /// **Recovery:** pick another time; the snapshot has already been refreshed.
    SlotNoLongerAvailable { date: NaiveDate, slot: TimeSlot },

    /// Input rejected before any mutation was attempted.
    ///
    /// Raised for a missing cancel/pause reason, a date outside the
    /// scheduling window, a time outside every slot, or an invalid
    /// subscription record.
    ValidationError { field: InputField, message: String },

    /// The external mutation failed.
    ///
    /// **Recovery:** the flow is back in its pre-confirm state with all
    /// selections preserved; retry or close.
    MutationFailure(String),

    /// `confirm()` was called while another confirmation was in flight.
    ///
    /// Flows swallow this and report nothing to the user.
    DuplicateRequest,

    /// A read-side collaborator call (availability fetch or slot check) failed.
    SourceError(String),

    /// The flow was closed and accepts no further input.
    FlowClosed,

    /// Invalid scheduling policy.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::ValidationError`].
    pub fn validation(field: InputField, message: impl Into<String>) -> Self {
        Error::ValidationError {
            field,
            message: message.into(),
        }
    }

    /// Whether the user can recover from this error without a code change.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::IllegalTransition { .. } | Error::ConfigError(_)
        )
    }

    /// Input field the error should be shown against, if any.
    pub fn field(&self) -> Option<InputField> {
        match self {
            Error::ValidationError { field, .. } => Some(*field),
            Error::SlotNoLongerAvailable { .. } => Some(InputField::Time),
            _ => None,
        }
    }

    /// Wrap a collaborator error as a mutation failure, keeping existing ones as-is.
    pub(crate) fn into_mutation_failure(self) -> Self {
        match self {
            e @ Error::MutationFailure(_) => e,
            e @ Error::SlotNoLongerAvailable { .. } => e,
            other => Error::MutationFailure(other.to_string()),
        }
    }

    /// Wrap a collaborator error as a read-side source failure.
    pub(crate) fn into_source_error(self) -> Self {
        match self {
            e @ Error::SourceError(_) => e,
            other => Error::SourceError(other.to_string()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IllegalTransition { status, action } => {
                write!(f, "Illegal transition: cannot {} from {}", action, status)
            }
            Error::SlotNoLongerAvailable { date, slot } => {
                write!(f, "Slot no longer available: {} {}", date, slot)
            }
            Error::ValidationError { field, message } => {
                write!(f, "Validation error ({}): {}", field, message)
            }
            Error::MutationFailure(msg) => write!(f, "Mutation failed: {}", msg),
            Error::DuplicateRequest => write!(f, "Duplicate request ignored"),
            Error::SourceError(msg) => write!(f, "Source error: {}", msg),
            Error::FlowClosed => write!(f, "Flow is closed"),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;

    #[test]
    fn test_error_display() {
        let err = Error::validation(InputField::Reason, "a reason is required");
        assert_eq!(
            err.to_string(),
            "Validation error (reason): a reason is required"
        );
    }

    #[test]
    fn test_illegal_transition_display() {
        let err = Error::IllegalTransition {
            status: Status::Booking(BookingStatus::Completed),
            action: Action::Cancel,
        };
        assert_eq!(
            err.to_string(),
            "Illegal transition: cannot cancel from booking Completed"
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_slot_conflict_points_at_time_field() {
        let err = Error::SlotNoLongerAvailable {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            slot: TimeSlot::Morning,
        };
        assert_eq!(err.field(), Some(InputField::Time));
    }

    #[test]
    fn test_into_mutation_failure_keeps_existing() {
        let err = Error::MutationFailure("timeout".to_string()).into_mutation_failure();
        assert_eq!(err, Error::MutationFailure("timeout".to_string()));

        let wrapped = Error::Other("503".to_string()).into_mutation_failure();
        assert_eq!(wrapped, Error::MutationFailure("Error: 503".to_string()));
    }
}
