//! In-memory [`TicketStore`](boxoffice_core::TicketStore) for fast, deterministic tests.
//!
//! All state sits behind one async mutex, so every store call is trivially
//! atomic. An issuance unit owns the lock for its whole lifetime and stages its
//! writes on a copy of the state; commit swaps the copy in, drop discards it.
//! That mirrors the isolation a database transaction gives the Postgres store.
//!
//! Failure injection: [`InMemoryTicketStore::inject_failures`] makes the next `n`
//! store calls fail with `StoreError::Unavailable` before touching state.

use boxoffice_core::{
    CancelOutcome, CapacityPool, CapacityStore, CatalogStore, ConsumeOutcome, HoldOutcome,
    HoldRequest, IssuanceStore, IssuanceUnit, IssuedRecord, Reservation, ReservationStatus,
    ReservationStore, ReservationTransition, ScanOutcome, ScanStore, SessionId, StoreError,
    StoreFuture, StoreResult, Ticket, TicketId, TicketStatus, TicketType, TicketTypeId,
    TicketTypeStatus, Transaction, TransitionOutcome,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct State {
    ticket_types: HashMap<TicketTypeId, TicketType>,
    reservations: HashMap<SessionId, Reservation>,
    transactions: HashMap<SessionId, Transaction>,
    // Issuance order is observable through `find_transaction`.
    tickets: Vec<Ticket>,
}

impl State {
    fn ticket_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        self.tickets.iter_mut().find(|t| t.id == id)
    }

    fn consume(&mut self, id: &TicketTypeId, pool: CapacityPool, amount: u32) -> Option<ConsumeOutcome> {
        self.ticket_types
            .get_mut(id)
            .map(|ticket_type| ticket_type.try_consume(pool, amount))
    }
}

#[derive(Debug, Default)]
struct FailureBudget(AtomicUsize);

impl FailureBudget {
    fn check(&self) -> StoreResult<()> {
        let injected = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory ticket store.
///
/// Clones share state, so one instance can back several components (or several
/// simulated processes) in the same test.
///
/// # Example
///
/// ```
/// use boxoffice_core::{CatalogStore, TicketTypeId};
/// use boxoffice_testing::InMemoryTicketStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryTicketStore::new();
/// store.seed_on_sale("vip", 10).await;
///
/// let vip = store.load_ticket_type(&TicketTypeId::new("vip")).await?;
/// assert_eq!(vip.map(|t| t.available()), Some(10));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<State>>,
    failures: Arc<FailureBudget>,
}

impl InMemoryTicketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an on-sale ticket type with `max_quantity` capacity.
    pub async fn seed_on_sale(&self, id: &str, max_quantity: u32) -> TicketTypeId {
        let ticket_type = TicketType::on_sale(TicketTypeId::new(id), max_quantity);
        let id = ticket_type.id.clone();
        self.state
            .lock()
            .await
            .ticket_types
            .insert(id.clone(), ticket_type);
        id
    }

    /// Make the next `count` store calls fail with `Unavailable`.
    pub fn inject_failures(&self, count: usize) {
        self.failures.0.store(count, Ordering::SeqCst);
    }

    /// Every stored ticket, in issuance order.
    pub async fn tickets(&self) -> Vec<Ticket> {
        self.state.lock().await.tickets.clone()
    }

    /// Number of stored transactions.
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    /// Every stored reservation, in no particular order.
    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.values().cloned().collect()
    }
}

impl CatalogStore for InMemoryTicketStore {
    fn insert_ticket_type<'a>(&'a self, ticket_type: &'a TicketType) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.failures.check()?;
            let mut state = self.state.lock().await;
            if state.ticket_types.contains_key(&ticket_type.id) {
                return Err(StoreError::Conflict(format!(
                    "ticket type {} already exists",
                    ticket_type.id
                )));
            }
            state
                .ticket_types
                .insert(ticket_type.id.clone(), ticket_type.clone());
            Ok(())
        })
    }

    fn load_ticket_type<'a>(
        &'a self,
        id: &'a TicketTypeId,
    ) -> StoreFuture<'a, Option<TicketType>> {
        Box::pin(async move {
            self.failures.check()?;
            Ok(self.state.lock().await.ticket_types.get(id).cloned())
        })
    }

    fn set_ticket_type_status<'a>(
        &'a self,
        id: &'a TicketTypeId,
        status: TicketTypeStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.failures.check()?;
            let mut state = self.state.lock().await;
            Ok(state
                .ticket_types
                .get_mut(id)
                .map(|ticket_type| ticket_type.status = status)
                .is_some())
        })
    }

    fn load_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            self.failures.check()?;
            let state = self.state.lock().await;
            Ok(state.tickets.iter().find(|t| t.id == id).cloned())
        })
    }
}

impl CapacityStore for InMemoryTicketStore {
    fn try_consume<'a>(
        &'a self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<ConsumeOutcome>> {
        Box::pin(async move {
            self.failures.check()?;
            Ok(self.state.lock().await.consume(id, pool, amount))
        })
    }

    fn release<'a>(
        &'a self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<u32>> {
        Box::pin(async move {
            self.failures.check()?;
            let mut state = self.state.lock().await;
            Ok(state
                .ticket_types
                .get_mut(id)
                .map(|ticket_type| ticket_type.release(pool, amount)))
        })
    }
}

impl ReservationStore for InMemoryTicketStore {
    fn hold<'a>(&'a self, request: &'a HoldRequest) -> StoreFuture<'a, HoldOutcome> {
        Box::pin(async move {
            self.failures.check()?;
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let existing = state.reservations.get(&request.session_id);
            let ticket_type = state.ticket_types.get_mut(&request.ticket_type_id);
            let outcome = request.apply(ticket_type, existing);

            if let HoldOutcome::Created(reservation) = &outcome {
                state
                    .reservations
                    .insert(reservation.session_id.clone(), reservation.clone());
            }
            Ok(outcome)
        })
    }

    fn load_reservation<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> StoreFuture<'a, Option<Reservation>> {
        Box::pin(async move {
            self.failures.check()?;
            Ok(self.state.lock().await.reservations.get(session_id).cloned())
        })
    }

    fn transition<'a>(
        &'a self,
        session_id: &'a SessionId,
        transition: ReservationTransition,
    ) -> StoreFuture<'a, TransitionOutcome> {
        Box::pin(async move {
            self.failures.check()?;
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let Some(reservation) = state.reservations.get_mut(session_id) else {
                return Ok(TransitionOutcome::NotFound);
            };
            let outcome = reservation.apply(transition);

            if let TransitionOutcome::Applied(applied) = &outcome {
                if let Some(ticket_type) = state.ticket_types.get_mut(&applied.ticket_type_id) {
                    ticket_type.release(CapacityPool::Held, applied.quantity);
                }
            }
            Ok(outcome)
        })
    }

    fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<SessionId>> {
        Box::pin(async move {
            self.failures.check()?;
            let state = self.state.lock().await;
            let mut expired: Vec<&Reservation> = state
                .reservations
                .values()
                .filter(|r| r.status == ReservationStatus::Active && r.is_expired_at(now))
                .collect();
            expired.sort_by_key(|r| r.expires_at);
            Ok(expired
                .into_iter()
                .take(limit)
                .map(|r| r.session_id.clone())
                .collect())
        })
    }
}

impl IssuanceStore for InMemoryTicketStore {
    fn find_transaction<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> StoreFuture<'a, Option<IssuedRecord>> {
        Box::pin(async move {
            self.failures.check()?;
            let state = self.state.lock().await;
            Ok(state.transactions.get(session_id).map(|transaction| IssuedRecord {
                transaction: transaction.clone(),
                tickets: state
                    .tickets
                    .iter()
                    .filter(|t| t.transaction_id == transaction.id)
                    .cloned()
                    .collect(),
            }))
        })
    }

    fn begin_issuance(&self) -> StoreFuture<'_, Box<dyn IssuanceUnit>> {
        Box::pin(async move {
            self.failures.check()?;
            let guard = Arc::clone(&self.state).lock_owned().await;
            let staged = guard.clone();
            let unit: Box<dyn IssuanceUnit> = Box::new(MemoryIssuanceUnit {
                guard,
                staged,
                failures: Arc::clone(&self.failures),
            });
            Ok(unit)
        })
    }

    fn cancel_ticket(&self, id: TicketId) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(async move {
            self.failures.check()?;
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let Some(ticket) = state.ticket_mut(id) else {
                return Ok(CancelOutcome::NotFound);
            };
            if ticket.status == TicketStatus::Cancelled {
                return Ok(CancelOutcome::AlreadyCancelled(ticket.clone()));
            }

            let consumed_capacity = ticket.status == TicketStatus::Valid;
            ticket.status = TicketStatus::Cancelled;
            let ticket = ticket.clone();

            if consumed_capacity {
                if let Some(ticket_type) = state.ticket_types.get_mut(&ticket.ticket_type_id) {
                    ticket_type.release(ticket.pool(), 1);
                }
            }
            Ok(CancelOutcome::Cancelled {
                ticket,
                released: consumed_capacity,
            })
        })
    }
}

impl ScanStore for InMemoryTicketStore {
    fn try_scan(&self, id: TicketId, now: DateTime<Utc>) -> StoreFuture<'_, Option<ScanOutcome>> {
        Box::pin(async move {
            self.failures.check()?;
            let mut state = self.state.lock().await;
            Ok(state.ticket_mut(id).map(|ticket| ticket.try_scan(now)))
        })
    }
}

/// Issuance unit over the in-memory state.
///
/// Holds the store lock until committed or dropped.
struct MemoryIssuanceUnit {
    guard: OwnedMutexGuard<State>,
    staged: State,
    failures: Arc<FailureBudget>,
}

impl IssuanceUnit for MemoryIssuanceUnit {
    fn insert_transaction<'a>(&'a mut self, transaction: &'a Transaction) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.failures.check()?;
            if self.staged.transactions.contains_key(&transaction.session_id) {
                return Ok(false);
            }
            self.staged
                .transactions
                .insert(transaction.session_id.clone(), transaction.clone());
            Ok(true)
        })
    }

    fn try_consume<'a>(
        &'a mut self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<ConsumeOutcome>> {
        Box::pin(async move {
            self.failures.check()?;
            Ok(self.staged.consume(id, pool, amount))
        })
    }

    fn insert_ticket<'a>(&'a mut self, ticket: &'a Ticket) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.failures.check()?;
            self.staged.tickets.push(ticket.clone());
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.failures.check()?;
            let Self {
                mut guard, staged, ..
            } = *self;
            *guard = staged;
            Ok(())
        })
    }
}
