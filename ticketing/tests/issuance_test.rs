//! Issuance tests: exactly-once per session, fulfill-over-reject, refunds.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use boxoffice_core::{
    AuditEvent, CancelOutcome, CapacityPool, FlagReason, Money, ReservationStatus, SessionId,
    TicketStatus, TicketStore, TicketTypeId,
};
use boxoffice_testing::helpers::PaymentBuilder;
use boxoffice_testing::{InMemoryTicketStore, MutableClock, RecordingAuditSink};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use ticketing::{
    BoxOffice, EngineConfig, IssuanceError, IssuanceOutcome, IssuanceRejection, IssuanceService,
    RetryPolicy, parse_payment_event,
};

struct Fixture {
    store: InMemoryTicketStore,
    audit: RecordingAuditSink,
    office: BoxOffice,
}

async fn fixture(types: &[(&str, u32)]) -> Fixture {
    let store = InMemoryTicketStore::new();
    for (id, max_quantity) in types {
        store.seed_on_sale(id, *max_quantity).await;
    }
    let audit = RecordingAuditSink::new();
    let config = EngineConfig {
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 2,
        ..EngineConfig::default()
    };
    let shared: Arc<dyn TicketStore> = Arc::new(store.clone());
    let office = BoxOffice::new(
        shared,
        Arc::new(MutableClock::starting_at_test_epoch()),
        Arc::new(audit.clone()),
        &config,
    );
    Fixture {
        store,
        audit,
        office,
    }
}

fn issuance(f: &Fixture) -> &IssuanceService {
    f.office.issuance()
}

#[tokio::test]
async fn issues_one_valid_ticket_per_unit() {
    let f = fixture(&[("ga", 10), ("vip", 2)]).await;
    let event = PaymentBuilder::new("cs_1")
        .item("ga", 3)
        .priced_item("vip", 1, 10_000)
        .build();

    let outcome = issuance(&f).process(&event).await.unwrap();
    let IssuanceOutcome::Issued(receipt) = outcome else {
        unreachable!("expected Issued, got {outcome:?}");
    };

    assert!(receipt.created);
    assert_eq!(receipt.ticket_count(), 4);
    assert_eq!(receipt.transaction.amount, Money::from_cents(17_500));
    assert_eq!(receipt.transaction.session_id, SessionId::new("cs_1"));
    assert!(receipt.tickets.iter().all(|t| t.status == TicketStatus::Valid
        && t.scan_count == 0
        && t.max_scan_count == 1
        && t.transaction_id == receipt.transaction.id));

    let ga = f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap();
    let vip = f.office.ledger().snapshot(&TicketTypeId::new("vip")).await.unwrap();
    assert_eq!(ga.sold_count, 3);
    assert_eq!(vip.sold_count, 1);
}

#[tokio::test]
async fn redelivery_returns_the_same_tickets_without_writing() {
    let f = fixture(&[("ga", 10)]).await;
    let event = PaymentBuilder::new("cs_1").item("ga", 2).build();

    let first = issuance(&f).process(&event).await.unwrap();
    let second = issuance(&f).process(&event).await.unwrap();

    let first = first.receipt().unwrap();
    let second = second.receipt().unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.transaction, second.transaction);
    assert_eq!(first.tickets, second.tickets);

    assert_eq!(f.store.transaction_count().await, 1);
    assert_eq!(f.store.tickets().await.len(), 2);
    assert_eq!(
        f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap().sold_count,
        2
    );
}

/// The gateway delivers the same event to many workers at once; one
/// transaction and one set of tickets results.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_duplicate_deliveries_issue_once() {
    let f = fixture(&[("ga", 100)]).await;
    let event = PaymentBuilder::new("cs_dup").item("ga", 3).build();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = issuance(&f).clone();
            let event = event.clone();
            tokio::spawn(async move { service.process(&event).await.unwrap() })
        })
        .collect();

    let receipts: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().receipt().cloned().unwrap())
        .collect();

    assert_eq!(receipts.iter().filter(|r| r.created).count(), 1);
    let transaction_id = receipts[0].transaction.id;
    assert!(receipts.iter().all(|r| r.transaction.id == transaction_id));

    assert_eq!(f.store.transaction_count().await, 1);
    assert_eq!(f.store.tickets().await.len(), 3);
    assert_eq!(
        f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap().sold_count,
        3
    );
}

#[tokio::test]
async fn exhausted_capacity_flags_instead_of_refusing() {
    let f = fixture(&[("ga", 2)]).await;
    let event = PaymentBuilder::new("cs_over").item("ga", 3).build();

    let outcome = issuance(&f).process(&event).await.unwrap();
    let IssuanceOutcome::IssuedFlagged { receipt, flagged } = outcome else {
        unreachable!("expected IssuedFlagged, got {outcome:?}");
    };

    assert_eq!(receipt.ticket_count(), 3);
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].pool, CapacityPool::Production);
    let statuses: Vec<_> = receipt.tickets.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![
            TicketStatus::Valid,
            TicketStatus::Valid,
            TicketStatus::FlaggedForReview
        ]
    );

    // Flagged units never touch the counter.
    let ga = f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap();
    assert_eq!(ga.sold_count, 2);

    let events = f.audit.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        AuditEvent::TicketFlagged {
            ticket_id,
            reason: FlagReason::CapacityExhausted { pool: CapacityPool::Production, max_quantity: 2 },
            ..
        } if *ticket_id == flagged[0].ticket_id
    ));
}

#[tokio::test]
async fn redelivered_flagged_issuance_reports_flags_again_without_new_audit() {
    let f = fixture(&[("ga", 0)]).await;
    let event = PaymentBuilder::new("cs_zero").item("ga", 1).build();

    let first = issuance(&f).process(&event).await.unwrap();
    let second = issuance(&f).process(&event).await.unwrap();

    assert!(matches!(first, IssuanceOutcome::IssuedFlagged { .. }));
    let IssuanceOutcome::IssuedFlagged { receipt, flagged } = second else {
        unreachable!("expected IssuedFlagged, got {second:?}");
    };
    assert!(!receipt.created);
    assert_eq!(flagged.len(), 1);
    assert_eq!(f.audit.flagged_count(), 1);
}

#[tokio::test]
async fn malformed_events_are_rejected_before_any_write() {
    let f = fixture(&[("ga", 10)]).await;

    let cases = [
        (PaymentBuilder::new("cs_a").build(), IssuanceRejection::NoLineItems),
        (
            PaymentBuilder::new("cs_b").item("ga", 1).item("ga", 0).build(),
            IssuanceRejection::ZeroQuantity(TicketTypeId::new("ga")),
        ),
        (
            PaymentBuilder::new("cs_c").item("ga", 1).item("nope", 1).build(),
            IssuanceRejection::UnknownTicketType(TicketTypeId::new("nope")),
        ),
        (
            PaymentBuilder::new("cs_d")
                .priced_item("ga", 2, u64::MAX)
                .build(),
            IssuanceRejection::AmountOverflow,
        ),
    ];

    for (event, expected) in cases {
        let outcome = issuance(&f).process(&event).await.unwrap();
        assert_eq!(outcome, IssuanceOutcome::Rejected(expected));
    }

    assert_eq!(f.store.transaction_count().await, 0);
    assert!(f.store.tickets().await.is_empty());
    assert_eq!(
        f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap().sold_count,
        0
    );
}

#[tokio::test]
async fn test_mode_purchases_use_the_test_pool() {
    let f = fixture(&[("ga", 1)]).await;

    let live = PaymentBuilder::new("cs_live").item("ga", 1).build();
    let test = PaymentBuilder::new("cs_test").item("ga", 1).test_mode().build();

    assert!(matches!(
        issuance(&f).process(&live).await.unwrap(),
        IssuanceOutcome::Issued(_)
    ));
    let outcome = issuance(&f).process(&test).await.unwrap();
    let IssuanceOutcome::Issued(receipt) = outcome else {
        unreachable!("expected Issued, got {outcome:?}");
    };
    assert!(receipt.tickets[0].is_test);

    let ga = f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap();
    assert_eq!((ga.sold_count, ga.test_sold_count), (1, 1));
}

#[tokio::test]
async fn cancelling_a_valid_ticket_returns_its_unit_once() {
    let f = fixture(&[("ga", 1)]).await;
    let event = PaymentBuilder::new("cs_1").item("ga", 1).build();
    let outcome = issuance(&f).process(&event).await.unwrap();
    let ticket_id = outcome.receipt().unwrap().tickets[0].id;

    let cancelled = issuance(&f).cancel_ticket(ticket_id).await.unwrap();
    assert!(matches!(
        cancelled,
        CancelOutcome::Cancelled { ref ticket, released: true } if ticket.status == TicketStatus::Cancelled
    ));
    assert!(matches!(
        issuance(&f).cancel_ticket(ticket_id).await.unwrap(),
        CancelOutcome::AlreadyCancelled(_)
    ));

    let ga = f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap();
    assert_eq!(ga.sold_count, 0);
}

#[tokio::test]
async fn cancelling_a_flagged_ticket_releases_nothing() {
    let f = fixture(&[("ga", 1)]).await;
    let event = PaymentBuilder::new("cs_1").item("ga", 2).build();
    let outcome = issuance(&f).process(&event).await.unwrap();
    let IssuanceOutcome::IssuedFlagged { flagged, .. } = outcome else {
        unreachable!("expected IssuedFlagged, got {outcome:?}");
    };

    let cancelled = issuance(&f).cancel_ticket(flagged[0].ticket_id).await.unwrap();
    assert!(matches!(
        cancelled,
        CancelOutcome::Cancelled { released: false, .. }
    ));

    let ga = f.office.ledger().snapshot(&TicketTypeId::new("ga")).await.unwrap();
    assert_eq!(ga.sold_count, 1);
}

#[tokio::test]
async fn transient_failures_are_retried_to_a_single_issuance() {
    let f = fixture(&[("ga", 10)]).await;
    let event = PaymentBuilder::new("cs_retry").item("ga", 2).build();

    f.store.inject_failures(2);
    let outcome = issuance(&f).process_with_retry(&event).await.unwrap();

    assert!(outcome.receipt().unwrap().created);
    assert_eq!(f.store.transaction_count().await, 1);
    assert_eq!(f.store.tickets().await.len(), 2);
}

#[tokio::test]
async fn retries_give_up_and_leave_nothing_behind() {
    let f = fixture(&[("ga", 10)]).await;
    let service = issuance(&f).clone().with_retry_policy(
        RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build(),
    );
    let event = PaymentBuilder::new("cs_down").item("ga", 2).build();

    f.store.inject_failures(10);
    let err = service.process_with_retry(&event).await.unwrap_err();
    assert!(err.is_retryable());

    f.store.inject_failures(0);
    assert_eq!(f.store.transaction_count().await, 0);
    assert!(service.lookup(&event.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn complete_purchase_fulfills_the_reservation() {
    let f = fixture(&[("ga", 5)]).await;
    let session = SessionId::new("cs_checkout");
    let ga = TicketTypeId::new("ga");

    let _ = f.office.reservations().create(&session, &ga, 2).await.unwrap();
    assert_eq!(f.office.ledger().snapshot(&ga).await.unwrap().held_count, 2);

    let event = PaymentBuilder::new("cs_checkout").item("ga", 2).build();
    let outcome = f.office.complete_purchase(&event).await.unwrap();
    let transaction_id = outcome.receipt().unwrap().transaction.id;

    let reservation = f.office.reservations().get(&session).await.unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Fulfilled);
    assert_eq!(reservation.transaction_id, Some(transaction_id));

    let snapshot = f.office.ledger().snapshot(&ga).await.unwrap();
    assert_eq!((snapshot.sold_count, snapshot.held_count), (2, 0));

    // Redelivery after fulfillment is harmless.
    let again = f.office.complete_purchase(&event).await.unwrap();
    assert!(!again.receipt().unwrap().created);
}

#[tokio::test]
async fn complete_purchase_without_reservation_still_issues() {
    let f = fixture(&[("ga", 5)]).await;
    let event = PaymentBuilder::new("cs_direct").item("ga", 1).build();

    let outcome = f.office.complete_purchase(&event).await.unwrap();
    assert!(matches!(outcome, IssuanceOutcome::Issued(_)));
}

#[test]
fn parses_gateway_payload() {
    let payload = br#"{
        "sessionId": "cs_live_123",
        "lineItems": [
            { "ticketTypeId": "ga", "quantity": 2, "unitPriceCents": 2500 }
        ],
        "customer": { "email": "ada@example.com", "name": "Ada" }
    }"#;

    let event = parse_payment_event(payload).unwrap();
    assert_eq!(event.session_id, SessionId::new("cs_live_123"));
    assert_eq!(event.unit_count(), 2);
    assert!(!event.is_test);

    let err = parse_payment_event(b"{\"sessionId\": 7}").unwrap_err();
    assert!(matches!(err, IssuanceError::MalformedEvent(_)));
    assert!(!err.is_retryable());
}
