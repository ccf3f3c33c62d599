//! Integration tests for booking-kit
//!
//! These tests drive the flows end to end against the in-memory source,
//! including concurrent clients racing for the same slot.

use booking_kit::action::{FlowPhase, ReasonChoice, OTHER_REASON_ID};
use booking_kit::model::{
    BillingCycle, Booking, BookingStatus, ServiceCategory, ServiceFrequency, Subscription,
    SubscriptionService, SubscriptionStatus, TimeSlot,
};
use booking_kit::observability::NoOpMetrics;
use booking_kit::source::InMemorySource;
use booking_kit::{
    Action, Error, InputField, ReschedulePhase, SchedulingPolicy, SchedulingService, Status,
};
use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn tomorrow() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
}

fn booking(id: &str, category: ServiceCategory) -> Booking {
    Booking {
        id: id.to_string(),
        service_id: "svc_clean".to_string(),
        category,
        date: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
        time_slot: TimeSlot::Afternoon,
        status: BookingStatus::Confirmed,
        staff_id: Some("staff_7".to_string()),
        address: "42 Harbour Rd".to_string(),
        total_price: 7500,
        notes: Some("Ring twice".to_string()),
        is_recurring: false,
    }
}

fn subscription() -> Subscription {
    Subscription {
        id: "sub_1".to_string(),
        subscription_services: vec![
            SubscriptionService {
                id: "ss_clean".to_string(),
                name: "Home cleaning".to_string(),
                category: ServiceCategory::Cleaning,
                price: 6000,
                frequency: ServiceFrequency::Weekly,
                scheduled_days: vec![chrono::Weekday::Tue],
            },
            SubscriptionService {
                id: "ss_garden".to_string(),
                name: "Garden care".to_string(),
                category: ServiceCategory::Gardening,
                price: 3000,
                frequency: ServiceFrequency::Monthly,
                scheduled_days: vec![chrono::Weekday::Sat],
            },
        ],
        billing_cycle: BillingCycle::Monthly,
        total_price: 9000,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: None,
        duration: 2,
        next_billing_date: Some(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
        last_billing_date: None,
        auto_renew: true,
        status: SubscriptionStatus::Active,
    }
}

fn service_with(source: InMemorySource) -> SchedulingService<InMemorySource> {
    init_logging();
    SchedulingService::new(source).with_metrics(Arc::new(NoOpMetrics))
}

/// Test 1: Cleaning reschedule, slot free at fetch and at confirm
///
/// - Mutation invoked once with the chosen date and slot
/// - Flow reaches Succeeded
/// - Booking status stays Confirmed
#[tokio::test]
async fn test_reschedule_cleaning_succeeds() {
    let source = InMemorySource::new();
    source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 2);
    let original = booking("bk_1", ServiceCategory::Cleaning);
    source.insert_booking(original.clone());
    let service = service_with(source);

    let flow = service
        .open_reschedule(original, today())
        .await
        .expect("Failed to open reschedule");

    flow.select_date(tomorrow()).expect("Date rejected");
    assert_eq!(flow.time_options(), vec![TimeSlot::Morning]);
    flow.select_time(TimeSlot::Morning).expect("Time rejected");
    assert!(flow.can_confirm());

    let outcome = flow
        .confirm()
        .await
        .expect("Confirm failed")
        .expect("Reschedule not applied");

    assert_eq!(flow.phase(), ReschedulePhase::Succeeded);
    assert_eq!(outcome.date, tomorrow());
    assert_eq!(outcome.slot, TimeSlot::Morning);
    assert_eq!(outcome.booking.status, BookingStatus::Confirmed);
    assert_eq!(outcome.previous_slot, TimeSlot::Afternoon);

    let stats = service.source().stats();
    assert_eq!(stats.slot_checks, 1);
    assert_eq!(stats.reschedule_mutations, 1);

    let stored = service.source().booking("bk_1").expect("Booking missing");
    assert_eq!(stored.date, tomorrow());
    assert_eq!(stored.time_slot, TimeSlot::Morning);
}

/// Test 2: Race lost between snapshot and confirm
///
/// - Snapshot shows Morning free
/// - Another client takes it before confirm
/// - Confirm returns SlotNoLongerAvailable without calling the mutation
/// - Flow lands in Failed; snapshot refetched, date kept, time cleared
#[tokio::test]
async fn test_reschedule_race_lost_before_confirm() {
    let source = InMemorySource::new();
    source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 1);
    let original = booking("bk_1", ServiceCategory::Cleaning);
    source.insert_booking(original.clone());
    let service = service_with(source);

    let flow = service.open_reschedule(original, today()).await.unwrap();
    flow.select_date(tomorrow()).unwrap();
    flow.select_time(TimeSlot::Morning).unwrap();

    // Another client books the last unit.
    assert!(service
        .source()
        .claim(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning));

    let err = flow.confirm().await.unwrap_err();
    assert_eq!(
        err,
        Error::SlotNoLongerAvailable {
            date: tomorrow(),
            slot: TimeSlot::Morning
        }
    );
    assert_eq!(err.field(), Some(InputField::Time));

    let stats = service.source().stats();
    assert_eq!(stats.reschedule_mutations, 0);
    assert_eq!(stats.availability_fetches, 2);

    assert_eq!(flow.phase(), ReschedulePhase::Failed);
    assert_eq!(flow.selected_date(), Some(tomorrow()));
    assert_eq!(flow.selected_time(), None);
    assert_eq!(flow.last_error(), Some(err));
    assert!(!flow.availability_stale());
    assert!(flow.time_options().is_empty());
    assert!(!flow.can_confirm());
}

/// Test 3: Two clients confirm the last slot at the same time
///
/// Both re-checks pass; the source's claim lets exactly one mutation win.
#[tokio::test(start_paused = true)]
async fn test_concurrent_clients_one_winner() {
    let source = InMemorySource::new().with_mutation_delay(Duration::from_millis(50));
    source.set_capacity(ServiceCategory::Plumbing, tomorrow(), TimeSlot::Evening, 1);
    let first = booking("bk_1", ServiceCategory::Plumbing);
    let second = booking("bk_2", ServiceCategory::Plumbing);
    source.insert_booking(first.clone());
    source.insert_booking(second.clone());
    let service = service_with(source);

    let flow_a = service.open_reschedule(first, today()).await.unwrap();
    let flow_b = service.open_reschedule(second, today()).await.unwrap();
    for flow in [&flow_a, &flow_b] {
        flow.select_date(tomorrow()).unwrap();
        flow.select_time(TimeSlot::Evening).unwrap();
    }

    let (a, b) = tokio::join!(flow_a.confirm(), flow_b.confirm());

    let winners = [&a, &b].iter().filter(|r| matches!(r, Ok(Some(_)))).count();
    let losers = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(Error::SlotNoLongerAvailable { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 1);
    assert_eq!(
        service
            .source()
            .remaining(ServiceCategory::Plumbing, tomorrow(), TimeSlot::Evening),
        0
    );
}

/// Test 4: Double confirm produces exactly one mutation
#[tokio::test(start_paused = true)]
async fn test_double_confirm_single_mutation() {
    let source = InMemorySource::new().with_mutation_delay(Duration::from_millis(100));
    source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Morning, 3);
    let original = booking("bk_1", ServiceCategory::Cleaning);
    source.insert_booking(original.clone());
    let service = service_with(source);

    let flow = service.open_reschedule(original, today()).await.unwrap();
    flow.select_date(tomorrow()).unwrap();
    flow.select_time(TimeSlot::Morning).unwrap();

    let (first, second) = tokio::join!(flow.confirm(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(flow.phase(), ReschedulePhase::Confirming);
        flow.confirm().await
    });

    assert!(first.expect("First confirm failed").is_some());
    assert!(second.expect("Second confirm should be a no-op").is_none());
    assert_eq!(service.source().stats().reschedule_mutations, 1);
}

/// Test 5: Double click on an action flow
#[tokio::test(start_paused = true)]
async fn test_double_click_action_single_mutation() {
    let source = InMemorySource::new().with_mutation_delay(Duration::from_millis(100));
    source.insert_subscription(subscription());
    let service = service_with(source);

    let flow = service
        .start_action(Action::Pause, subscription(), today())
        .unwrap();
    flow.select_reason(ReasonChoice::preset("travel")).unwrap();

    let (first, second) = tokio::join!(flow.confirm(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(flow.phase(), FlowPhase::Processing);
        flow.confirm().await
    });

    let outcome = first.unwrap().expect("Pause not applied");
    assert_eq!(
        outcome.resulting_status,
        Status::Subscription(SubscriptionStatus::Paused)
    );
    assert!(second.unwrap().is_none());
    assert_eq!(service.source().stats().status_mutations, 1);
}

/// Test 6: Cancel without a reason is rejected before the source is called
#[tokio::test]
async fn test_cancel_subscription_requires_reason() {
    let source = InMemorySource::new();
    source.insert_subscription(subscription());
    let service = service_with(source);

    let flow = service
        .start_action(Action::Cancel, subscription(), today())
        .unwrap();

    let err = flow.confirm().await.unwrap_err();
    assert!(matches!(
        err,
        Error::ValidationError {
            field: InputField::Reason,
            ..
        }
    ));
    assert_eq!(flow.phase(), FlowPhase::Open);
    assert_eq!(service.source().stats().status_mutations, 0);

    flow.select_reason(ReasonChoice::preset(OTHER_REASON_ID)).unwrap();
    assert!(flow.confirm().await.is_err());
    assert_eq!(service.source().stats().status_mutations, 0);

    flow.select_reason(ReasonChoice::preset("moving")).unwrap();
    let outcome = flow.confirm().await.unwrap().expect("Cancel not applied");
    assert_eq!(
        outcome.resulting_status,
        Status::Subscription(SubscriptionStatus::Cancelled)
    );
    assert_eq!(outcome.message, "Subscription cancelled");
}

/// Test 7: Illegal action never reaches the source
#[tokio::test]
async fn test_illegal_action_rejected_up_front() {
    let source = InMemorySource::new();
    let service = service_with(source);

    let mut cancelled = booking("bk_1", ServiceCategory::Cleaning);
    cancelled.status = BookingStatus::Cancelled;

    let err = service
        .start_action(Action::Resume, cancelled.clone(), today())
        .err()
        .expect("Resume of a cancelled booking must be rejected");
    assert!(matches!(err, Error::IllegalTransition { .. }));
    assert!(!err.is_recoverable());

    let result = service.open_reschedule(cancelled, today()).await;
    assert!(matches!(result, Err(Error::IllegalTransition { .. })));

    let stats = service.source().stats();
    assert_eq!(stats.status_mutations, 0);
    assert_eq!(stats.availability_fetches, 0);
}

/// Test 8: Mutation failure keeps the input and allows a retry
#[tokio::test]
async fn test_action_failure_then_retry() {
    let source = InMemorySource::new();
    source.insert_booking(booking("bk_1", ServiceCategory::Electrical));
    let service = service_with(source);

    let flow = service
        .start_action(Action::Cancel, booking("bk_1", ServiceCategory::Electrical), today())
        .unwrap();
    flow.select_reason(ReasonChoice::other("Fixed it myself"))
        .unwrap();

    service.source().fail_mutations(true);
    let err = flow.confirm().await.unwrap_err();
    assert!(matches!(err, Error::MutationFailure(_)));
    assert!(err.is_recoverable());
    assert_eq!(flow.phase(), FlowPhase::Open);
    assert_eq!(flow.last_error(), Some(err));

    service.source().fail_mutations(false);
    let outcome = flow.confirm().await.unwrap().expect("Retry not applied");
    assert_eq!(outcome.request.reason.as_deref(), Some("Fixed it myself"));
    assert_eq!(
        service.source().booking("bk_1").unwrap().status,
        BookingStatus::Cancelled
    );
}

/// Test 9: Closing while a mutation is in flight
///
/// The close is deferred; the result is still applied.
#[tokio::test(start_paused = true)]
async fn test_close_during_confirm_is_deferred() {
    let source = InMemorySource::new().with_mutation_delay(Duration::from_millis(100));
    source.set_capacity(ServiceCategory::Cleaning, tomorrow(), TimeSlot::Afternoon, 1);
    let original = booking("bk_1", ServiceCategory::Cleaning);
    source.insert_booking(original.clone());
    let service = service_with(source);

    let flow = service.open_reschedule(original, today()).await.unwrap();
    flow.select_date(tomorrow()).unwrap();
    flow.select_time(TimeSlot::Afternoon).unwrap();

    let (result, closed_now) = tokio::join!(flow.confirm(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        flow.close()
    });

    assert!(!closed_now);
    assert!(result.unwrap().is_some());
    assert_eq!(flow.phase(), ReschedulePhase::Closed);
    assert!(flow.outcome().is_some());
    assert_eq!(
        service.source().booking("bk_1").unwrap().date,
        tomorrow()
    );
}

/// Test 10: Free-form categories never touch availability
#[tokio::test]
async fn test_free_form_category_bypasses_availability() {
    let source = InMemorySource::new();
    let original = booking("bk_1", ServiceCategory::Laundry);
    source.insert_booking(original.clone());
    let service = service_with(source);

    let flow = service.open_reschedule(original, today()).await.unwrap();
    flow.select_date(tomorrow()).unwrap();
    assert_eq!(flow.time_options(), TimeSlot::ALL.to_vec());
    flow.select_time(TimeSlot::Evening).unwrap();
    flow.confirm().await.unwrap().expect("Reschedule not applied");

    let stats = service.source().stats();
    assert_eq!(stats.availability_fetches, 0);
    assert_eq!(stats.slot_checks, 0);
    assert_eq!(stats.reschedule_mutations, 1);
}

/// Test 11: Reactivation carries the chosen next billing date
#[tokio::test]
async fn test_reactivate_expired_subscription() {
    let source = InMemorySource::new();
    let expired = Subscription {
        status: SubscriptionStatus::Expired,
        ..subscription()
    };
    source.insert_subscription(expired.clone());
    let service = service_with(source);

    let suggested = expired.billing_cycle.advance(today()).unwrap();
    let flow = service
        .start_action(Action::Reactivate, expired, today())
        .unwrap();
    flow.set_next_billing_date(suggested).unwrap();

    let outcome = flow.confirm().await.unwrap().expect("Reactivation not applied");
    assert_eq!(
        outcome.resulting_status,
        Status::Subscription(SubscriptionStatus::Active)
    );
    let stored = service.source().subscription("sub_1").unwrap();
    assert_eq!(stored.next_billing_date, Some(suggested));
}

/// Test 12: Progress and pricing for a displayed subscription
#[test]
fn test_subscription_progress_and_price() {
    let service = service_with(InMemorySource::new());
    let sub = subscription();
    sub.validate().expect("Subscription should be valid");

    let now = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
    assert_eq!(service.progress(&sub, now), 50);

    let summary = service.price_summary(&sub);
    assert_eq!(summary.per_cycle, 9000);
    assert_eq!(summary.cycles_in_term, 2);
    assert_eq!(summary.term_total, 18_000);
}

/// Test 13: Policy loaded from JSON shortens the window
#[tokio::test]
async fn test_policy_from_json_bounds_window() {
    let policy = SchedulingPolicy::from_json(r#"{ "horizonDays": 3, "freeFormCategories": [] }"#)
        .expect("Failed to parse policy");
    let source = InMemorySource::new();
    let original = booking("bk_1", ServiceCategory::Cooking);
    source.insert_booking(original.clone());
    let service = service_with(source).with_policy(policy).unwrap();

    let flow = service.open_reschedule(original, today()).await.unwrap();
    assert_eq!(service.source().stats().availability_fetches, 1);

    let too_far = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let err = flow.select_date(too_far).unwrap_err();
    assert_eq!(err.field(), Some(InputField::Date));
    assert!(flow.select_date(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()).is_ok());
}
