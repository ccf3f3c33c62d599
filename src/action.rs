//! Confirmation flow for status actions (pause, cancel, resume, reactivate).
//!
//! ```text
//! start ──▶ Open ──confirm──▶ Processing ──ok──▶ Succeeded
//!            ▲                    │
//!            └──────── err ───────┘
//! ```
//!
//! At most one confirmation runs per flow: a `confirm()` issued while
//! `Processing` returns `Ok(None)` without touching the source. Failures put
//! the flow back into `Open` with the chosen reason intact.
//!
//! Rescheduling is a status-preserving action with its own selection and
//! re-check protocol; it goes through
//! [`RescheduleValidator`](crate::reschedule::RescheduleValidator), which
//! follows the same single-in-flight and deferred-close rules.

use crate::error::{Error, InputField, Result};
use crate::model::{Booking, Subscription};
use crate::observability::EngineMetrics;
use crate::source::{SchedulingSource, StatusChange};
use crate::transition::{ensure_legal, Action, EntityKind, Status};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Id of the catch-all reason that requires free text.
pub const OTHER_REASON_ID: &str = "other";

/// One entry of a fixed reason set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasonOption {
    pub id: &'static str,
    pub label: &'static str,
}

const fn reason(id: &'static str, label: &'static str) -> ReasonOption {
    ReasonOption { id, label }
}

const BOOKING_CANCEL_REASONS: &[ReasonOption] = &[
    reason("schedule_conflict", "Schedule conflict"),
    reason("no_longer_needed", "Service no longer needed"),
    reason("found_alternative", "Found another provider"),
    reason("price", "Too expensive"),
    reason(OTHER_REASON_ID, "Other"),
];

const SUBSCRIPTION_CANCEL_REASONS: &[ReasonOption] = &[
    reason("too_expensive", "Too expensive"),
    reason("not_using", "Not using the services enough"),
    reason("quality", "Unhappy with service quality"),
    reason("moving", "Moving away"),
    reason(OTHER_REASON_ID, "Other"),
];

const PAUSE_REASONS: &[ReasonOption] = &[
    reason("travel", "Travelling"),
    reason("budget", "Temporary budget constraints"),
    reason("temporary_break", "Taking a short break"),
    reason(OTHER_REASON_ID, "Other"),
];

/// Reason set offered for `action` on `kind`. Empty when no reason is asked for.
pub fn reason_options(kind: EntityKind, action: Action) -> &'static [ReasonOption] {
    match (kind, action) {
        (EntityKind::Booking, Action::Cancel) => BOOKING_CANCEL_REASONS,
        (EntityKind::Subscription, Action::Cancel) => SUBSCRIPTION_CANCEL_REASONS,
        (_, Action::Pause) => PAUSE_REASONS,
        _ => &[],
    }
}

/// Whether `action` cannot be confirmed without a reason.
pub fn requires_reason(action: Action) -> bool {
    matches!(action, Action::Cancel | Action::Pause)
}

/// A reason as chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonChoice {
    /// An entry of the reason set, by id.
    Preset(String),
    /// Free text, used with the `other` entry or as an optional note.
    Other(String),
}

impl ReasonChoice {
    pub fn preset(id: impl Into<String>) -> Self {
        ReasonChoice::Preset(id.into())
    }

    pub fn other(text: impl Into<String>) -> Self {
        ReasonChoice::Other(text.into())
    }
}

/// The entity an action is applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionTarget {
    Booking(Booking),
    Subscription(Subscription),
}

impl ActionTarget {
    pub fn id(&self) -> &str {
        match self {
            ActionTarget::Booking(b) => &b.id,
            ActionTarget::Subscription(s) => &s.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ActionTarget::Booking(_) => EntityKind::Booking,
            ActionTarget::Subscription(_) => EntityKind::Subscription,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ActionTarget::Booking(b) => Status::Booking(b.status),
            ActionTarget::Subscription(s) => Status::Subscription(s.status),
        }
    }
}

impl From<Booking> for ActionTarget {
    fn from(b: Booking) -> Self {
        ActionTarget::Booking(b)
    }
}

impl From<Subscription> for ActionTarget {
    fn from(s: Subscription) -> Self {
        ActionTarget::Subscription(s)
    }
}

/// A confirmed request, as sent to the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub target_entity_id: String,
    pub action_type: Action,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Display payload of a successful action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub request: ActionRequest,
    pub previous_status: Status,
    /// Status the transition table predicts.
    pub expected_status: Status,
    /// Status the source actually returned.
    pub resulting_status: Status,
    /// The entity as returned by the source.
    pub target: ActionTarget,
    pub confirmed_at: DateTime<Utc>,
    pub message: String,
}

impl ActionOutcome {
    /// The source returned a status other than the table's prediction.
    pub fn is_contract_violation(&self) -> bool {
        self.expected_status != self.resulting_status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Open,
    Processing,
    /// Terminal. Dismissal timing is left to the caller.
    Succeeded,
    Closed,
}

struct FlowState {
    target: ActionTarget,
    phase: FlowPhase,
    reason: Option<ReasonChoice>,
    next_billing_date: Option<NaiveDate>,
    last_error: Option<Error>,
    outcome: Option<ActionOutcome>,
    close_requested: bool,
}

impl FlowState {
    fn reject(&mut self, err: Error) -> Error {
        self.last_error = Some(err.clone());
        err
    }

    fn ensure_open(&self, field: InputField) -> Result<()> {
        match self.phase {
            FlowPhase::Open => Ok(()),
            FlowPhase::Processing => Err(Error::validation(
                field,
                "a confirmation is in progress; wait for it to finish",
            )),
            FlowPhase::Succeeded | FlowPhase::Closed => Err(Error::FlowClosed),
        }
    }

    fn finish(&mut self) {
        if self.close_requested {
            debug!("Applying deferred close for {}", self.target.id());
            self.phase = FlowPhase::Closed;
        }
    }

    /// Reason text to send, or why none can be sent.
    fn resolved_reason(&self, action: Action, options: &[ReasonOption]) -> Result<Option<String>> {
        let text = match &self.reason {
            None => None,
            Some(ReasonChoice::Preset(id)) => options
                .iter()
                .find(|o| o.id == id.as_str())
                .map(|o| o.label.to_string()),
            Some(ReasonChoice::Other(text)) => {
                Some(text.trim().to_string()).filter(|t| !t.is_empty())
            }
        };

        if text.is_none() && requires_reason(action) {
            let message = match self.reason {
                Some(ReasonChoice::Other(_)) => "describe the reason",
                _ => "select a reason",
            };
            return Err(Error::validation(
                InputField::Reason,
                format!("{} to {}", message, action),
            ));
        }
        Ok(text)
    }
}

/// Confirmation flow for one action on one entity.
///
/// Owns its selections; any number of flows can be open at once. Methods take
/// `&self` so the flow can be shared behind an `Arc`.
pub struct ActionConfirmationFlow<S: SchedulingSource> {
    action: Action,
    today: NaiveDate,
    source: Arc<S>,
    metrics: Arc<dyn EngineMetrics>,
    state: Mutex<FlowState>,
}

impl<S: SchedulingSource> ActionConfirmationFlow<S> {
    /// Open a flow for `action` on `target`.
    ///
    /// `today` bounds the next billing date of a reactivation.
    ///
    /// # Errors
    ///
    /// - `Error::IllegalTransition`: `action` is not legal from the target's status
    /// - `Error::ValidationError` (action): `reschedule` or a system-only action
    pub fn start(
        action: Action,
        target: impl Into<ActionTarget>,
        today: NaiveDate,
        source: Arc<S>,
        metrics: Arc<dyn EngineMetrics>,
    ) -> Result<Self> {
        let target = target.into();

        if !action.is_user_initiated() {
            return Err(Error::validation(
                InputField::Action,
                format!("{} is performed by the system", action),
            ));
        }
        if action == Action::Reschedule {
            return Err(Error::validation(
                InputField::Action,
                "rescheduling goes through RescheduleValidator",
            ));
        }

        if let Err(e) = ensure_legal(target.kind(), target.status(), action) {
            metrics.record_illegal_transition(target.id(), &e.to_string());
            return Err(e);
        }

        debug!("Opened {} flow for {} {}", action, target.kind(), target.id());

        Ok(ActionConfirmationFlow {
            action,
            today,
            source,
            metrics,
            state: Mutex::new(FlowState {
                target,
                phase: FlowPhase::Open,
                reason: None,
                next_billing_date: None,
                last_error: None,
                outcome: None,
                close_requested: false,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn phase(&self) -> FlowPhase {
        self.state().phase
    }

    pub fn target(&self) -> ActionTarget {
        self.state().target.clone()
    }

    pub fn reason_options(&self) -> &'static [ReasonOption] {
        reason_options(self.state().target.kind(), self.action)
    }

    pub fn selected_reason(&self) -> Option<ReasonChoice> {
        self.state().reason.clone()
    }

    pub fn next_billing_date(&self) -> Option<NaiveDate> {
        self.state().next_billing_date
    }

    pub fn last_error(&self) -> Option<Error> {
        self.state().last_error.clone()
    }

    pub fn outcome(&self) -> Option<ActionOutcome> {
        self.state().outcome.clone()
    }

    /// Whether `confirm()` would currently pass input validation.
    pub fn can_confirm(&self) -> bool {
        let state = self.state();
        state.phase == FlowPhase::Open
            && state
                .resolved_reason(self.action, self.reason_options_for(&state))
                .is_ok()
            && (self.action != Action::Reactivate || state.next_billing_date.is_some())
    }

    fn reason_options_for(&self, state: &FlowState) -> &'static [ReasonOption] {
        reason_options(state.target.kind(), self.action)
    }

    /// Choose a reason.
    ///
    /// Choosing the `other` preset is the same as choosing empty free text;
    /// confirmation then waits for the text.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` (reason) for an id outside the reason set or
    /// while a confirmation is in flight.
    pub fn select_reason(&self, choice: ReasonChoice) -> Result<()> {
        let mut state = self.state();
        state.ensure_open(InputField::Reason)?;

        let choice = match choice {
            ReasonChoice::Preset(id) if id == OTHER_REASON_ID => ReasonChoice::Other(String::new()),
            ReasonChoice::Preset(id) => {
                if !self.reason_options_for(&state).iter().any(|o| o.id == id) {
                    return Err(state.reject(Error::validation(
                        InputField::Reason,
                        format!("unknown reason '{}' for {}", id, self.action),
                    )));
                }
                ReasonChoice::Preset(id)
            }
            other => other,
        };

        state.reason = Some(choice);
        state.last_error = None;
        Ok(())
    }

    /// Set the next billing date of a reactivated subscription.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` (next billing date) when the flow is not a
    /// reactivation or the date is before today.
    pub fn set_next_billing_date(&self, date: NaiveDate) -> Result<()> {
        let mut state = self.state();
        state.ensure_open(InputField::NextBillingDate)?;

        if self.action != Action::Reactivate {
            return Err(state.reject(Error::validation(
                InputField::NextBillingDate,
                format!("{} does not change billing", self.action),
            )));
        }
        if date < self.today {
            return Err(state.reject(Error::validation(
                InputField::NextBillingDate,
                format!("{} is in the past", date),
            )));
        }

        state.next_billing_date = Some(date);
        state.last_error = None;
        Ok(())
    }

    /// Validate input and run the mutation.
    ///
    /// Returns `Ok(None)` when a confirmation is already in flight or the
    /// flow already succeeded; no mutation is issued.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: missing reason or next billing date; no
    ///   mutation is issued
    /// - `Error::MutationFailure`: the source rejected or failed the write;
    ///   the flow is back in `Open` with its input kept
    /// - `Error::FlowClosed`: the flow was closed
    pub async fn confirm(&self) -> Result<Option<ActionOutcome>> {
        let (request, change, previous_status, expected_status) = match self.begin() {
            Ok(prepared) => prepared,
            Err(Error::DuplicateRequest) => {
                debug!("Duplicate {} confirm ignored", self.action);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let timer = Instant::now();
        let id = request.target_entity_id.as_str();
        let result = match expected_status.kind() {
            EntityKind::Booking => self
                .source
                .mutate_booking_status(id, &change)
                .await
                .map(ActionTarget::Booking),
            EntityKind::Subscription => self
                .source
                .mutate_subscription_status(id, &change)
                .await
                .map(ActionTarget::Subscription),
        };

        let mut state = self.state();
        match result {
            Ok(updated) => {
                self.metrics
                    .record_mutation(id, self.action.as_str(), timer.elapsed());

                let resulting_status = updated.status();
                if resulting_status != expected_status {
                    error!(
                        "Contract violation on {}: {} expected {}, source returned {}",
                        id, self.action, expected_status, resulting_status
                    );
                    self.metrics.record_contract_violation(
                        id,
                        &expected_status.to_string(),
                        &resulting_status.to_string(),
                    );
                }
                self.metrics.record_transition(
                    id,
                    previous_status.label(),
                    resulting_status.label(),
                );
                info!(
                    "✓ {} {} on {} in {:?}",
                    self.action,
                    id,
                    resulting_status,
                    timer.elapsed()
                );

                let outcome = ActionOutcome {
                    message: success_message(updated.kind(), self.action),
                    request,
                    previous_status,
                    expected_status,
                    resulting_status,
                    target: updated.clone(),
                    confirmed_at: Utc::now(),
                };

                state.target = updated;
                state.outcome = Some(outcome.clone());
                state.phase = FlowPhase::Succeeded;
                state.finish();
                Ok(Some(outcome))
            }
            Err(e) => {
                let err = e.into_mutation_failure();
                self.metrics
                    .record_mutation_failure(id, self.action.as_str(), &err.to_string());
                state.phase = FlowPhase::Open;
                let err = state.reject(err);
                state.finish();
                Err(err)
            }
        }
    }

    fn begin(&self) -> Result<(ActionRequest, StatusChange, Status, Status)> {
        let mut state = self.state();

        match state.phase {
            FlowPhase::Processing | FlowPhase::Succeeded => return Err(Error::DuplicateRequest),
            FlowPhase::Closed => return Err(Error::FlowClosed),
            FlowPhase::Open => {}
        }

        let reason = match state.resolved_reason(self.action, self.reason_options_for(&state)) {
            Ok(reason) => reason,
            Err(e) => return Err(state.reject(e)),
        };

        let mut change = StatusChange::new(self.action);
        if let Some(text) = &reason {
            change = change.with_reason(text.clone());
        }
        if self.action == Action::Reactivate {
            match state.next_billing_date {
                Some(date) => change = change.with_next_billing_date(date),
                None => {
                    return Err(state.reject(Error::validation(
                        InputField::NextBillingDate,
                        "choose the next billing date to reactivate",
                    )))
                }
            }
        }

        let previous_status = state.target.status();
        let expected_status =
            match ensure_legal(state.target.kind(), previous_status, self.action) {
                Ok(status) => status,
                Err(e) => {
                    self.metrics
                        .record_illegal_transition(state.target.id(), &e.to_string());
                    return Err(state.reject(e));
                }
            };

        let request = ActionRequest {
            target_entity_id: state.target.id().to_string(),
            action_type: self.action,
            reason,
            requested_at: Utc::now(),
        };

        state.phase = FlowPhase::Processing;
        state.last_error = None;
        debug!("» Processing {} on {}", self.action, request.target_entity_id);

        Ok((request, change, previous_status, expected_status))
    }

    /// Close the flow.
    ///
    /// Discards the selected reason and returns `true`, unless a confirmation
    /// is in flight: then the close is applied once the mutation resolves and
    /// `false` is returned.
    pub fn close(&self) -> bool {
        let mut state = self.state();

        if state.phase == FlowPhase::Processing {
            debug!("Close of {} deferred until confirm resolves", state.target.id());
            state.close_requested = true;
            return false;
        }

        state.reason = None;
        state.next_billing_date = None;
        state.last_error = None;
        state.phase = FlowPhase::Closed;
        true
    }
}

fn success_message(kind: EntityKind, action: Action) -> String {
    let verb = match action {
        Action::Pause => "paused",
        Action::Cancel => "cancelled",
        Action::Resume => "resumed",
        Action::Reschedule => "rescheduled",
        Action::Reactivate => "reactivated",
        Action::Complete => "completed",
    };
    let noun = match kind {
        EntityKind::Booking => "Booking",
        EntityKind::Subscription => "Subscription",
    };
    format!("{} {}", noun, verb)
}
