//! Reservation manager tests: holds, expiry, and capacity conservation.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use boxoffice_core::environment::Clock;
use boxoffice_core::{
    CatalogStore, ReservationStatus, SessionId, TicketStore, TicketTypeId, TicketTypeStatus,
    TransactionId,
};
use boxoffice_testing::{InMemoryTicketStore, MutableClock};
use chrono::Duration;
use futures::future::join_all;
use std::sync::Arc;
use ticketing::{CapacityLedger, ReservationError, ReservationManager, ReservationOutcome};

struct Fixture {
    store: InMemoryTicketStore,
    clock: MutableClock,
    reservations: ReservationManager,
    ledger: CapacityLedger,
    ga: TicketTypeId,
}

async fn fixture(max_quantity: u32) -> Fixture {
    let store = InMemoryTicketStore::new();
    let ga = store.seed_on_sale("ga", max_quantity).await;
    let clock = MutableClock::starting_at_test_epoch();
    let shared: Arc<dyn TicketStore> = Arc::new(store.clone());

    Fixture {
        reservations: ReservationManager::new(
            Arc::clone(&shared),
            Arc::new(clock.clone()),
            Duration::minutes(15),
        ),
        ledger: CapacityLedger::new(shared),
        store,
        clock,
        ga,
    }
}

fn session(id: &str) -> SessionId {
    SessionId::new(id)
}

async fn held(f: &Fixture) -> u32 {
    f.ledger.snapshot(&f.ga).await.unwrap().held_count
}

#[tokio::test]
async fn create_holds_capacity_and_is_idempotent_per_session() {
    let f = fixture(10).await;

    let created = f.reservations.create(&session("cs_1"), &f.ga, 3).await.unwrap();
    let ReservationOutcome::Created(reservation) = created else {
        unreachable!("expected Created, got {created:?}");
    };
    assert_eq!(reservation.status, ReservationStatus::Active);
    assert_eq!(reservation.quantity, 3);
    assert_eq!(
        reservation.expires_at,
        Some(f.clock.now() + Duration::minutes(15))
    );
    assert_eq!(held(&f).await, 3);

    let again = f.reservations.create(&session("cs_1"), &f.ga, 5).await.unwrap();
    assert_eq!(again, ReservationOutcome::Existing(reservation));
    assert_eq!(held(&f).await, 3);
}

#[tokio::test]
async fn insufficient_availability_is_an_outcome_not_an_error() {
    let f = fixture(4).await;

    let _ = f.reservations.create(&session("cs_1"), &f.ga, 3).await.unwrap();
    let refused = f.reservations.create(&session("cs_2"), &f.ga, 2).await.unwrap();

    assert_eq!(
        refused,
        ReservationOutcome::CapacityExceeded {
            requested: 2,
            available: 1
        }
    );
    assert!(refused.reservation().is_none());
    assert_eq!(held(&f).await, 3);
}

#[tokio::test]
async fn holds_count_against_sold_capacity() {
    let f = fixture(5).await;

    f.ledger
        .try_consume(&f.ga, boxoffice_core::CapacityPool::Production, 4)
        .await
        .unwrap();

    let refused = f.reservations.create(&session("cs_1"), &f.ga, 2).await.unwrap();
    assert!(matches!(
        refused,
        ReservationOutcome::CapacityExceeded { available: 1, .. }
    ));
}

#[tokio::test]
async fn only_available_ticket_types_can_be_held() {
    let f = fixture(5).await;
    f.store
        .set_ticket_type_status(&f.ga, TicketTypeStatus::Closed)
        .await
        .unwrap();

    let outcome = f.reservations.create(&session("cs_1"), &f.ga, 1).await.unwrap();
    assert_eq!(outcome, ReservationOutcome::NotOnSale(TicketTypeStatus::Closed));
}

#[tokio::test]
async fn invalid_requests_are_errors() {
    let f = fixture(5).await;

    assert_eq!(
        f.reservations.create(&session("cs_1"), &f.ga, 0).await,
        Err(ReservationError::ZeroQuantity)
    );

    let unknown = TicketTypeId::new("vip");
    assert_eq!(
        f.reservations.create(&session("cs_1"), &unknown, 1).await,
        Err(ReservationError::UnknownTicketType(unknown))
    );
}

#[tokio::test]
async fn every_exit_from_active_returns_held_capacity_once() {
    let f = fixture(10).await;

    for (id, qty) in [("cs_fulfill", 2), ("cs_release", 3), ("cs_expire", 4)] {
        let _ = f.reservations.create(&session(id), &f.ga, qty).await.unwrap();
    }
    assert_eq!(held(&f).await, 9);

    let transaction_id = TransactionId::new();
    let fulfilled = f
        .reservations
        .fulfill(&session("cs_fulfill"), transaction_id)
        .await
        .unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
    assert_eq!(fulfilled.transaction_id, Some(transaction_id));
    assert_eq!(held(&f).await, 7);

    let released = f.reservations.release(&session("cs_release")).await.unwrap();
    assert_eq!(released.status, ReservationStatus::Released);
    assert_eq!(held(&f).await, 4);

    let expired = f.reservations.expire(&session("cs_expire")).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(held(&f).await, 0);

    // Repeats change nothing.
    let again = f
        .reservations
        .fulfill(&session("cs_fulfill"), transaction_id)
        .await
        .unwrap();
    assert_eq!(again, fulfilled);
    assert!(matches!(
        f.reservations.release(&session("cs_release")).await,
        Err(ReservationError::InvalidTransition {
            from: ReservationStatus::Released,
            to: ReservationStatus::Released,
            ..
        })
    ));
    assert!(matches!(
        f.reservations.fulfill(&session("cs_expire"), TransactionId::new()).await,
        Err(ReservationError::InvalidTransition {
            from: ReservationStatus::Expired,
            to: ReservationStatus::Fulfilled,
            ..
        })
    ));
    assert_eq!(held(&f).await, 0);
}

#[tokio::test]
async fn transitions_on_unknown_sessions_are_not_found() {
    let f = fixture(1).await;
    assert_eq!(
        f.reservations.release(&session("ghost")).await,
        Err(ReservationError::NotFound(session("ghost")))
    );
    assert_eq!(f.reservations.get(&session("ghost")).await, Ok(None));
}

#[tokio::test]
async fn overdue_reservations_expire_when_read() {
    let f = fixture(5).await;
    let _ = f.reservations.create(&session("cs_1"), &f.ga, 2).await.unwrap();

    f.clock.advance(Duration::minutes(14));
    let still_active = f.reservations.get(&session("cs_1")).await.unwrap().unwrap();
    assert_eq!(still_active.status, ReservationStatus::Active);

    f.clock.advance(Duration::minutes(1));
    let expired = f.reservations.get(&session("cs_1")).await.unwrap().unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(held(&f).await, 0);
}

#[tokio::test]
async fn terminal_sessions_cannot_hold_again() {
    let f = fixture(5).await;
    let _ = f.reservations.create(&session("cs_1"), &f.ga, 2).await.unwrap();

    f.clock.advance(Duration::minutes(20));
    let outcome = f.reservations.create(&session("cs_1"), &f.ga, 2).await.unwrap();

    let ReservationOutcome::SessionClosed(reservation) = outcome else {
        unreachable!("expected SessionClosed, got {outcome:?}");
    };
    assert_eq!(reservation.status, ReservationStatus::Expired);
    assert_eq!(held(&f).await, 0);
}

#[tokio::test]
async fn overdue_but_active_reservations_can_still_be_fulfilled() {
    let f = fixture(5).await;
    let _ = f.reservations.create(&session("cs_1"), &f.ga, 2).await.unwrap();

    f.clock.advance(Duration::hours(1));
    let fulfilled = f
        .reservations
        .fulfill(&session("cs_1"), TransactionId::new())
        .await
        .unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
    assert_eq!(held(&f).await, 0);
}

#[tokio::test]
async fn reservations_without_expiry_never_expire() {
    let f = fixture(5).await;
    let _ = f
        .reservations
        .create_until(&session("cs_1"), &f.ga, 1, None)
        .await
        .unwrap();

    f.clock.advance(Duration::days(365));
    assert_eq!(f.reservations.expire_stale(100).await.unwrap(), 0);
    let reservation = f.reservations.get(&session("cs_1")).await.unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Active);
}

#[tokio::test]
async fn sweeper_expires_only_overdue_reservations_in_batches() {
    let f = fixture(20).await;

    for i in 0..5 {
        let _ = f
            .reservations
            .create(&session(&format!("early_{i}")), &f.ga, 1)
            .await
            .unwrap();
    }
    f.clock.advance(Duration::minutes(10));
    let _ = f.reservations.create(&session("late"), &f.ga, 1).await.unwrap();

    f.clock.advance(Duration::minutes(6));
    assert_eq!(f.reservations.expire_stale(3).await.unwrap(), 3);
    assert_eq!(f.reservations.expire_stale(3).await.unwrap(), 2);
    assert_eq!(f.reservations.expire_stale(3).await.unwrap(), 0);
    assert_eq!(held(&f).await, 1);

    let late = f.reservations.get(&session("late")).await.unwrap().unwrap();
    assert_eq!(late.status, ReservationStatus::Active);
}

/// 50 sessions race for 8 units, 1 unit each; the bound holds and the held
/// counter matches the active reservations exactly.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_holds_respect_capacity() {
    let f = fixture(8).await;

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let reservations = f.reservations.clone();
            let ga = f.ga.clone();
            tokio::spawn(async move {
                reservations
                    .create(&SessionId::new(format!("cs_{i}")), &ga, 1)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let created = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(|o| matches!(o, ReservationOutcome::Created(_)))
        .count();

    assert_eq!(created, 8);
    assert_eq!(held(&f).await, 8);

    let active: u32 = f
        .store
        .reservations()
        .await
        .iter()
        .filter(|r| r.status == ReservationStatus::Active)
        .map(|r| r.quantity)
        .sum();
    assert_eq!(active, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_holds_for_one_session_create_once() {
    let f = fixture(10).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let reservations = f.reservations.clone();
            let ga = f.ga.clone();
            tokio::spawn(async move {
                reservations
                    .create(&SessionId::new("cs_same"), &ga, 2)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, ReservationOutcome::Created(_)))
        .count();
    assert_eq!(created, 1);
    assert!(outcomes.iter().all(|o| o.reservation().is_some()));
    assert_eq!(held(&f).await, 2);
}
