//! Capacity ledger tests against the in-memory store.
//!
//! The concurrency tests spawn real tasks on a multi-threaded runtime so the
//! store's atomic step is what keeps the bound, not call ordering.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use boxoffice_core::{
    CapacityPool, CatalogStore, ConsumeOutcome, TicketStore, TicketType, TicketTypeId,
    TicketTypeStatus,
};
use boxoffice_testing::InMemoryTicketStore;
use boxoffice_testing::properties::{CounterOp, counter_ops};
use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;
use ticketing::{CapacityLedger, LedgerError};

async fn ledger_with(id: &str, max_quantity: u32) -> (CapacityLedger, InMemoryTicketStore, TicketTypeId) {
    let store = InMemoryTicketStore::new();
    let id = store.seed_on_sale(id, max_quantity).await;
    let shared: Arc<dyn TicketStore> = Arc::new(store.clone());
    (CapacityLedger::new(shared), store, id)
}

/// 100 buyers race for 10 units; exactly 10 get one.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_consumes_never_exceed_the_bound() {
    let (ledger, _store, ga) = ledger_with("ga", 10).await;

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let ledger = ledger.clone();
            let ga = ga.clone();
            tokio::spawn(async move {
                ledger
                    .try_consume(&ga, CapacityPool::Production, 1)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<ConsumeOutcome> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    assert_eq!(accepted, 10);

    let snapshot = ledger.snapshot(&ga).await.unwrap();
    assert_eq!(snapshot.sold_count, 10);
    assert_eq!(snapshot.available(), 0);
    assert_eq!(snapshot.status, TicketTypeStatus::SoldOut);
}

#[tokio::test]
async fn rejection_reports_current_count_and_writes_nothing() {
    let (ledger, _store, ga) = ledger_with("ga", 5).await;

    let first = ledger.try_consume(&ga, CapacityPool::Production, 4).await.unwrap();
    assert_eq!(first, ConsumeOutcome::Accepted { new_count: 4 });

    let second = ledger.try_consume(&ga, CapacityPool::Production, 2).await.unwrap();
    assert_eq!(
        second,
        ConsumeOutcome::Rejected {
            count: 4,
            max_quantity: 5
        }
    );

    assert_eq!(ledger.snapshot(&ga).await.unwrap().sold_count, 4);
}

#[tokio::test]
async fn test_sales_do_not_touch_production_availability() {
    let (ledger, _store, ga) = ledger_with("ga", 2).await;

    ledger.try_consume(&ga, CapacityPool::Test, 2).await.unwrap();
    let snapshot = ledger.snapshot(&ga).await.unwrap();
    assert_eq!(snapshot.test_sold_count, 2);
    assert_eq!(snapshot.available(), 2);
    assert_eq!(snapshot.status, TicketTypeStatus::Available);

    let outcome = ledger.try_consume(&ga, CapacityPool::Production, 2).await.unwrap();
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn holds_are_bounded_by_sold_plus_held() {
    let (ledger, _store, ga) = ledger_with("ga", 10).await;

    ledger.try_consume(&ga, CapacityPool::Production, 6).await.unwrap();

    let too_many = ledger.try_consume(&ga, CapacityPool::Held, 5).await.unwrap();
    assert!(!too_many.is_accepted());

    let fits = ledger.try_consume(&ga, CapacityPool::Held, 4).await.unwrap();
    assert_eq!(fits, ConsumeOutcome::Accepted { new_count: 4 });
}

#[tokio::test]
async fn release_floors_at_zero_and_reopens_sales() {
    let (ledger, _store, ga) = ledger_with("ga", 3).await;

    ledger.try_consume(&ga, CapacityPool::Production, 3).await.unwrap();
    assert_eq!(
        ledger.snapshot(&ga).await.unwrap().status,
        TicketTypeStatus::SoldOut
    );

    assert_eq!(ledger.release(&ga, CapacityPool::Production, 1).await.unwrap(), 2);
    assert_eq!(
        ledger.snapshot(&ga).await.unwrap().status,
        TicketTypeStatus::Available
    );

    assert_eq!(ledger.release(&ga, CapacityPool::Production, 50).await.unwrap(), 0);
}

#[tokio::test]
async fn ledger_never_opens_a_draft_ticket_type() {
    let store = InMemoryTicketStore::new();
    let draft = TicketType::new(TicketTypeId::new("presale"), 5);
    store.insert_ticket_type(&draft).await.unwrap();
    let ledger = CapacityLedger::new(Arc::new(store));

    ledger
        .try_consume(&draft.id, CapacityPool::Production, 5)
        .await
        .unwrap();
    ledger
        .release(&draft.id, CapacityPool::Production, 1)
        .await
        .unwrap();

    assert_eq!(
        ledger.snapshot(&draft.id).await.unwrap().status,
        TicketTypeStatus::Draft
    );
}

#[tokio::test]
async fn invalid_input_is_an_error() {
    let (ledger, _store, ga) = ledger_with("ga", 3).await;

    assert_eq!(
        ledger.try_consume(&ga, CapacityPool::Production, 0).await,
        Err(LedgerError::ZeroAmount)
    );
    assert_eq!(
        ledger.release(&ga, CapacityPool::Held, 0).await,
        Err(LedgerError::ZeroAmount)
    );

    let unknown = TicketTypeId::new("nope");
    assert_eq!(
        ledger.try_consume(&unknown, CapacityPool::Production, 1).await,
        Err(LedgerError::UnknownTicketType(unknown.clone()))
    );
    assert_eq!(
        ledger.snapshot(&unknown).await,
        Err(LedgerError::UnknownTicketType(unknown))
    );
}

#[tokio::test]
async fn store_failures_surface_and_write_nothing() {
    let (ledger, store, ga) = ledger_with("ga", 3).await;

    store.inject_failures(1);
    let result = ledger.try_consume(&ga, CapacityPool::Production, 1).await;
    assert!(matches!(result, Err(LedgerError::Store(ref e)) if e.is_retryable()));

    assert_eq!(ledger.snapshot(&ga).await.unwrap().sold_count, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the store agrees with the pure counter model on every
    /// sequence, and no pool ever exceeds its bound.
    #[test]
    fn prop_store_matches_model_and_respects_bounds(
        max_quantity in 0u32..20,
        ops in counter_ops(6, 40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (ledger, _store, ga) = ledger_with("ga", max_quantity).await;
            let mut model = TicketType::on_sale(ga.clone(), max_quantity);

            for op in ops {
                match op {
                    CounterOp::Consume(pool, amount) => {
                        let expected = model.try_consume(pool, amount);
                        let actual = ledger.try_consume(&ga, pool, amount).await.unwrap();
                        prop_assert_eq!(actual, expected);
                    }
                    CounterOp::Release(pool, amount) => {
                        let expected = model.release(pool, amount);
                        let actual = ledger.release(&ga, pool, amount).await.unwrap();
                        prop_assert_eq!(actual, expected);
                    }
                }

                let snapshot = ledger.snapshot(&ga).await.unwrap();
                prop_assert_eq!(&snapshot, &model);
                prop_assert!(snapshot.sold_count <= max_quantity);
                prop_assert!(snapshot.test_sold_count <= max_quantity);
            }
            Ok(())
        })?;
    }
}
