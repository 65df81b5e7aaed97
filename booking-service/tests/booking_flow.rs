mod common;

use bigdecimal::BigDecimal;
use booking_service::pipeline::BookingOutcome;
use booking_service::store::ReservationStore;
use booking_service::sweeper::ExpirySweeper;
use chrono::{Duration, Timelike};
use common::*;
use shared::*;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn money(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

#[tokio::test]
async fn diagnostics_booking_holds_the_slot_pending_payment() {
    let harness = Harness::new();
    let now = booking_day_now();

    let outcome = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
        .await
        .unwrap();

    let BookingOutcome::AwaitingPayment { reservation, checkout_url } = outcome else {
        panic!("diagnostics is prepaid");
    };
    assert_eq!(reservation.status, ReservationStatus::PendingPayment);
    assert_eq!(checkout_url, format!("https://checkout.example/pay/{}", reservation.public_id));
    assert_eq!(reservation.slot.start, at("2024-07-15T09:00:00Z"));
    assert_eq!(reservation.slot.end, at("2024-07-15T10:30:00Z"));
    assert_eq!(reservation.payment_expires_at, Some(now + Duration::minutes(HOLD_MINUTES)));
    assert!(!reservation.after_hours);
    assert_eq!(reservation.pricing.total, money("65.00"));
    assert_eq!(reservation.public_id.len(), 10);
    assert_eq!(harness.gateway.calls(), 1);
}

#[tokio::test]
async fn overlapping_requests_conflict_and_adjacent_ones_do_not() {
    let harness = Harness::new();
    let now = booking_day_now();
    harness.reserve_diagnostics(now).await;

    let same = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
        .await;
    let err = same.unwrap_err();
    assert!(matches!(err, BookingError::SlotConflict));
    assert!(err.is_retryable_with_different_input());

    let overlapping = harness
        .bookings
        .create_booking_at(request("battery_replacement", "2024-07-15T10:45"), now)
        .await;
    assert!(matches!(overlapping, Err(BookingError::SlotConflict)));

    // The first slot, travel buffer included, ends at 11:30 local.
    let adjacent = harness
        .bookings
        .create_booking_at(request("battery_replacement", "2024-07-15T11:30"), now)
        .await;
    assert!(adjacent.is_ok());
}

#[tokio::test]
async fn weekend_and_late_requests_are_rejected() {
    let harness = Harness::new();
    let now = booking_day_now();

    let saturday = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-13T10:00"), now)
        .await;
    assert!(matches!(saturday, Err(BookingError::ClosedDay { .. })));

    let late_oil = harness
        .bookings
        .create_booking_at(request("oil_service", "2024-07-15T17:30"), now)
        .await;
    assert!(matches!(late_oil, Err(BookingError::OutsideBusinessHours { .. })));
}

#[tokio::test]
async fn after_hours_diagnostics_carries_the_surcharge() {
    let harness = Harness::new();
    let outcome = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T17:30"), booking_day_now())
        .await
        .unwrap();

    let reservation = outcome.reservation();
    assert!(reservation.after_hours);
    assert_eq!(reservation.pricing.surcharge, money("32.50"));
    assert_eq!(reservation.pricing.total, money("97.50"));
    assert_eq!(reservation.pricing.line_items.len(), 2);
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_touching_the_store() {
    let harness = Harness::new();
    let now = booking_day_now();

    let mut short_address = request("diagnostics", "2024-07-15T10:00");
    short_address.address = "Bristol".into();
    assert!(matches!(
        harness.bookings.create_booking_at(short_address, now).await,
        Err(BookingError::InvalidRequest(_))
    ));

    let mut bad_email = request("diagnostics", "2024-07-15T10:00");
    bad_email.customer.email = "ada-at-example".into();
    assert!(matches!(
        harness.bookings.create_booking_at(bad_email, now).await,
        Err(BookingError::InvalidRequest(_))
    ));

    assert!(matches!(
        harness
            .bookings
            .create_booking_at(request("tyre_fitting", "2024-07-15T10:00"), now)
            .await,
        Err(BookingError::UnsupportedServiceType(_))
    ));
    assert!(matches!(
        harness
            .bookings
            .create_booking_at(request("diagnostics", "15/07/2024 10am"), now)
            .await,
        Err(BookingError::InvalidTimeFormat(_))
    ));
    assert!(matches!(
        harness
            .bookings
            .create_booking_at(request("diagnostics", "2024-07-08T10:00"), now)
            .await,
        Err(BookingError::SlotInPast(_))
    ));
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn local_time_survives_the_clock_change() {
    let harness = Harness::new();
    let now = at("2024-10-01T09:00:00Z");

    let summer = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-10-25T10:00"), now)
        .await
        .unwrap();
    let winter = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-10-28T10:00"), now)
        .await
        .unwrap();

    assert_eq!(summer.reservation().slot.start, at("2024-10-25T09:00:00Z"));
    assert_eq!(winter.reservation().slot.start, at("2024-10-28T10:00:00Z"));

    let timezone = harness.bookings.policy().resolver.timezone;
    for outcome in [&summer, &winter] {
        let stored = harness
            .bookings
            .get_booking_at(&outcome.reservation().public_id, now)
            .await
            .unwrap();
        let local = stored.slot.start.with_timezone(&timezone);
        assert_eq!((local.hour(), local.minute()), (10, 0));
    }
}

#[tokio::test]
async fn concurrent_requests_for_one_slot_book_it_once() {
    let harness = Harness::new();
    let now = booking_day_now();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let bookings = harness.bookings.clone();
            tokio::spawn(async move {
                bookings
                    .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
                    .await
            })
        })
        .collect();

    let mut booked = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => booked += 1,
            Err(BookingError::SlotConflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(booked, 1);
    assert_eq!(conflicts, 15);
}

#[tokio::test]
async fn gateway_outage_keeps_the_hold_and_checkout_can_be_retried() {
    let harness = Harness::new();
    let now = booking_day_now();
    harness.gateway.fail_next(10);

    let err = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
        .await
        .unwrap_err();
    let BookingError::GatewayUnavailable { public_id, .. } = err else {
        panic!("expected gateway outage, got {err}");
    };
    assert_eq!(harness.gateway.calls(), 3);

    let held = harness.bookings.get_booking_at(&public_id, now).await.unwrap();
    assert_eq!(held.status, ReservationStatus::PendingPayment);
    assert!(held.payment_session.is_none());

    harness.gateway.fail_next(0);
    let retried = harness.bookings.open_checkout_at(&public_id, now).await.unwrap();
    let BookingOutcome::AwaitingPayment { checkout_url, .. } = retried else {
        panic!("hold should still await payment");
    };

    let again = harness.bookings.open_checkout_at(&public_id, now).await.unwrap();
    let BookingOutcome::AwaitingPayment { checkout_url: same_url, .. } = again else {
        panic!("hold should still await payment");
    };
    assert_eq!(checkout_url, same_url);
    assert_eq!(harness.gateway.calls(), 4);
}

#[tokio::test]
async fn quote_visits_are_confirmed_without_payment() {
    let harness = Harness::new();
    let outcome = harness
        .bookings
        .create_booking_at(request("quote_visit", "2024-07-15T14:00"), booking_day_now())
        .await
        .unwrap();

    let BookingOutcome::Confirmed { reservation } = outcome else {
        panic!("quote visits are paid on site");
    };
    assert_eq!(reservation.status, ReservationStatus::Confirmed);
    assert!(reservation.payment_expires_at.is_none());
    assert_eq!(harness.gateway.calls(), 0);
    assert_eq!(harness.notifier.sent().len(), 1);
}

#[tokio::test]
async fn lapsed_holds_expire_once_and_free_the_slot() {
    let harness = Harness::new();
    let now = booking_day_now();
    let reservation = harness.reserve_diagnostics(now).await;
    let sweeper = ExpirySweeper::new(harness.store.clone(), std::time::Duration::from_secs(60));

    assert_eq!(sweeper.sweep_at(now + Duration::minutes(HOLD_MINUTES - 1)).await.unwrap(), 0);

    let later = now + Duration::minutes(HOLD_MINUTES + 1);
    assert_eq!(sweeper.sweep_at(later).await.unwrap(), 1);
    assert_eq!(sweeper.sweep_at(later).await.unwrap(), 0);

    let expired = harness.bookings.get_booking_at(&reservation.public_id, later).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert!(expired.payment_expires_at.is_none());

    let late = harness.confirmations.process_at(paid("evt_late", &expired), later).await;
    assert!(matches!(late, Err(BookingError::LateConfirmationAfterExpiry { .. })));
    let still = harness.bookings.get_booking_at(&reservation.public_id, later).await.unwrap();
    assert_eq!(still.status, ReservationStatus::Expired);

    let rebooked = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T10:00"), later)
        .await;
    assert!(rebooked.is_ok());
}

#[tokio::test]
async fn reading_a_booking_expires_its_lapsed_hold() {
    let harness = Harness::new();
    let now = booking_day_now();
    let reservation = harness.reserve_diagnostics(now).await;

    let later = now + Duration::minutes(HOLD_MINUTES);
    let read = harness.bookings.get_booking_at(&reservation.public_id, later).await.unwrap();
    assert_eq!(read.status, ReservationStatus::Expired);

    let checkout = harness.bookings.open_checkout_at(&reservation.public_id, later).await;
    assert!(matches!(
        checkout,
        Err(BookingError::InvalidTransition {
            from: ReservationStatus::Expired,
            ..
        })
    ));
}

#[tokio::test]
async fn fee_changes_do_not_reprice_existing_bookings() {
    let harness = Harness::new();
    let now = booking_day_now();
    let reservation = harness.reserve_diagnostics(now).await;

    let mut dearer = FeeTable::standard();
    if let Some(fee) = dearer.services.get_mut(&ServiceType::Diagnostics) {
        fee.amount = money("99.00");
    }
    let repriced = harness.repriced(dearer);

    let stored = repriced.get_booking_at(&reservation.public_id, now).await.unwrap();
    assert_eq!(stored.pricing, reservation.pricing);
    assert_eq!(stored.pricing.total, money("65.00"));

    let fresh = repriced
        .create_booking_at(request("diagnostics", "2024-07-16T10:00"), now)
        .await
        .unwrap();
    assert_eq!(fresh.reservation().pricing.total, money("99.00"));
}

#[tokio::test]
async fn operators_move_confirmed_jobs_through_the_day() {
    let harness = Harness::new();
    let now = booking_day_now();
    let reservation = harness.reserve_diagnostics(now).await;
    harness
        .confirmations
        .process_at(paid("evt_1", &reservation), now)
        .await
        .unwrap();

    let id = &reservation.public_id;
    let started = harness.bookings.change_status(id, StatusChange::Start, now).await.unwrap();
    assert_eq!(started.status, ReservationStatus::InProgress);
    let done = harness.bookings.change_status(id, StatusChange::Complete, now).await.unwrap();
    assert_eq!(done.status, ReservationStatus::Completed);

    let cancel = harness.bookings.change_status(id, StatusChange::Cancel, now).await;
    assert!(matches!(
        cancel,
        Err(BookingError::InvalidTransition {
            from: ReservationStatus::Completed,
            to: ReservationStatus::Cancelled
        })
    ));

    assert!(matches!(
        harness.bookings.get_booking_at("NOSUCHBOOK", now).await,
        Err(BookingError::ReservationNotFound(_))
    ));
}

#[tokio::test]
async fn cancelling_a_hold_frees_its_slot() {
    let harness = Harness::new();
    let now = booking_day_now();
    let reservation = harness.reserve_diagnostics(now).await;

    let cancelled = harness
        .bookings
        .change_status(&reservation.public_id, StatusChange::Cancel, now)
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let store: Arc<dyn ReservationStore> = harness.store.clone();
    assert!(store.expire_stale(now + Duration::days(1)).await.unwrap().is_empty());

    assert!(harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
        .await
        .is_ok());
}

#[tokio::test]
async fn pay_on_site_booking_is_confirmed_by_the_insert_alone() {
    let harness = Harness::new();
    harness.store.fail_transition.store(true, Ordering::SeqCst);

    let outcome = harness
        .bookings
        .create_booking_at(request("quote_visit", "2024-07-15T14:00"), booking_day_now())
        .await
        .unwrap();

    let stored = harness
        .bookings
        .get_booking_at(&outcome.reservation().public_id, booking_day_now())
        .await
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Confirmed);
    assert_eq!(harness.notifier.sent().len(), 1);
}

#[tokio::test]
async fn failed_pay_on_site_booking_leaves_the_slot_free() {
    let harness = Harness::new();
    let now = booking_day_now();
    harness.store.fail_reserve.store(true, Ordering::SeqCst);

    let err = harness
        .bookings
        .create_booking_at(request("quote_visit", "2024-07-15T14:00"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::StoreUnavailable(_)));
    assert!(harness.notifier.sent().is_empty());

    harness.store.fail_reserve.store(false, Ordering::SeqCst);
    let retried = harness
        .bookings
        .create_booking_at(request("quote_visit", "2024-07-15T14:00"), now + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(retried.reservation().status, ReservationStatus::Confirmed);
}

#[tokio::test]
async fn gateway_retries_send_one_session_expiry_matching_the_hold() {
    let harness = Harness::new();
    let now = booking_day_now();
    harness.gateway.fail_next(2);

    let reservation = harness.reserve_diagnostics(now).await;

    let requests = harness.gateway.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.expires_at == requests[0].expires_at));
    assert_eq!(reservation.payment_expires_at, Some(requests[0].expires_at));
    assert_eq!(reservation.payment_expires_at, Some(now + Duration::minutes(HOLD_MINUTES)));
}

#[tokio::test]
async fn short_hold_is_stretched_to_the_checkout_session_lifetime() {
    let harness = Harness::with_hold(30);
    let now = booking_day_now();
    let sweeper = ExpirySweeper::new(harness.store.clone(), std::time::Duration::from_secs(60));

    let reservation = harness.reserve_diagnostics(now).await;
    let session_ends = harness.gateway.requests()[0].expires_at;
    assert_eq!(session_ends, now + Duration::minutes(31));
    assert_eq!(reservation.payment_expires_at, Some(session_ends));

    assert_eq!(sweeper.sweep_at(now + Duration::minutes(30)).await.unwrap(), 0);
    assert_eq!(sweeper.sweep_at(session_ends).await.unwrap(), 1);
}

#[tokio::test]
async fn late_checkout_retry_keeps_the_hold_alive_for_the_new_session() {
    let harness = Harness::new();
    let now = booking_day_now();
    harness.gateway.fail_next(10);

    let err = harness
        .bookings
        .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
        .await
        .unwrap_err();
    let BookingError::GatewayUnavailable { public_id, .. } = err else {
        panic!("expected gateway outage, got {err}");
    };

    harness.gateway.fail_next(0);
    let retry_at = now + Duration::minutes(HOLD_MINUTES - 5);
    let reopened = harness.bookings.open_checkout_at(&public_id, retry_at).await.unwrap();

    let session_ends = retry_at + Duration::minutes(31);
    assert_eq!(harness.gateway.requests().last().unwrap().expires_at, session_ends);
    assert_eq!(reopened.reservation().payment_expires_at, Some(session_ends));

    let after_original_hold = now + Duration::minutes(HOLD_MINUTES + 1);
    let held = harness.bookings.get_booking_at(&public_id, after_original_hold).await.unwrap();
    assert_eq!(held.status, ReservationStatus::PendingPayment);
}
