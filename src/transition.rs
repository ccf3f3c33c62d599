//! Legal status transitions for bookings and subscriptions.
//!
//! Kept as a pure lookup so that both the confirmation flows and any server
//! enforcing the same rules agree on a single table.
//!
//! # Bookings
//!
//! | From                        | Action        | To             |
//! |-----------------------------|---------------|----------------|
//! | Pending / Confirmed         | reschedule    | *unchanged*    |
//! | Pending / Confirmed         | pause         | Paused         |
//! | Paused                      | resume        | Confirmed      |
//! | Pending / Confirmed / Paused| cancel        | Cancelled      |
//! | InProgress                  | complete (system) | Completed  |
//! | Completed / Cancelled       | *none*        |                |
//!
//! # Subscriptions
//!
//! | From                        | Action        | To             |
//! |-----------------------------|---------------|----------------|
//! | Active                      | pause         | Paused         |
//! | Paused                      | resume        | Active         |
//! | Active / Paused / Pending   | cancel        | Cancelled      |
//! | Cancelled / Expired         | reactivate    | Active         |
//!
//! Reactivation additionally needs a new next billing date; the table only
//! governs status.

use crate::error::{Error, Result};
use crate::model::{BookingStatus, SubscriptionStatus};
use std::fmt;

/// Kind of entity a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Booking,
    Subscription,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Booking => write!(f, "booking"),
            EntityKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// Status of either entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Booking(BookingStatus),
    Subscription(SubscriptionStatus),
}

impl Status {
    pub fn kind(&self) -> EntityKind {
        match self {
            Status::Booking(_) => EntityKind::Booking,
            Status::Subscription(_) => EntityKind::Subscription,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Booking(s) => s.label(),
            Status::Subscription(s) => s.label(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Booking(s) => write!(f, "booking {:?}", s),
            Status::Subscription(s) => write!(f, "subscription {:?}", s),
        }
    }
}

impl From<BookingStatus> for Status {
    fn from(s: BookingStatus) -> Self {
        Status::Booking(s)
    }
}

impl From<SubscriptionStatus> for Status {
    fn from(s: SubscriptionStatus) -> Self {
        Status::Subscription(s)
    }
}

/// Action that moves an entity between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Pause,
    Cancel,
    Resume,
    Reschedule,
    Reactivate,
    /// System completion of an in-progress booking. Never user-triggered.
    Complete,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Pause,
        Action::Cancel,
        Action::Resume,
        Action::Reschedule,
        Action::Reactivate,
        Action::Complete,
    ];

    pub fn is_user_initiated(&self) -> bool {
        !matches!(self, Action::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pause => "pause",
            Action::Cancel => "cancel",
            Action::Resume => "resume",
            Action::Reschedule => "reschedule",
            Action::Reactivate => "reactivate",
            Action::Complete => "complete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup of legal transitions.
pub struct StatusTransitionTable;

impl StatusTransitionTable {
    /// Resulting booking status, or `None` if `action` is illegal from `status`.
    pub fn booking(status: BookingStatus, action: Action) -> Option<BookingStatus> {
        use BookingStatus::*;

        match (status, action) {
            (Pending | Confirmed, Action::Reschedule) => Some(status),
            (Pending | Confirmed, Action::Pause) => Some(Paused),
            (Paused, Action::Resume) => Some(Confirmed),
            (Pending | Confirmed | Paused, Action::Cancel) => Some(Cancelled),
            (InProgress, Action::Complete) => Some(Completed),
            _ => None,
        }
    }

    /// Resulting subscription status, or `None` if `action` is illegal from `status`.
    pub fn subscription(status: SubscriptionStatus, action: Action) -> Option<SubscriptionStatus> {
        use SubscriptionStatus::*;

        match (status, action) {
            (Active, Action::Pause) => Some(Paused),
            (Paused, Action::Resume) => Some(Active),
            (Active | Paused | Pending, Action::Cancel) => Some(Cancelled),
            (Cancelled | Expired, Action::Reactivate) => Some(Active),
            _ => None,
        }
    }

    fn lookup(status: Status, action: Action) -> Option<Status> {
        match status {
            Status::Booking(s) => Self::booking(s, action).map(Status::Booking),
            Status::Subscription(s) => Self::subscription(s, action).map(Status::Subscription),
        }
    }

    /// Whether `action` is legal for an entity of `kind` currently in `status`.
    ///
    /// A status of the wrong kind is never legal.
    pub fn is_legal_transition(kind: EntityKind, status: Status, action: Action) -> bool {
        status.kind() == kind && Self::lookup(status, action).is_some()
    }

    /// Status reached by applying `action`.
    ///
    /// # Errors
    ///
    /// Returns `Error::IllegalTransition` when the table has no entry.
    pub fn resulting_status(kind: EntityKind, status: Status, action: Action) -> Result<Status> {
        if status.kind() != kind {
            return Err(Error::IllegalTransition { status, action });
        }
        Self::lookup(status, action).ok_or(Error::IllegalTransition { status, action })
    }

    /// User-triggerable actions legal from `status`, in a stable order.
    pub fn allowed_actions(status: Status) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|a| a.is_user_initiated())
            .filter(|a| Self::lookup(status, *a).is_some())
            .collect()
    }
}

/// Check `action` against the table, logging loudly when it is illegal.
pub(crate) fn ensure_legal(kind: EntityKind, status: Status, action: Action) -> Result<Status> {
    StatusTransitionTable::resulting_status(kind, status, action).map_err(|e| {
        error!("✗ {} rejected before mutation: {}", kind, e);
        e
    })
}
