//! Store traits: the persistence seams of the engine.
//!
//! # Design
//!
//! Every method that decides against a bound (`try_consume`, `hold`, `try_scan`)
//! must be implemented as **one atomic step** in the store: a single conditional
//! statement, or a unit of work that either commits entirely or leaves nothing
//! behind. A read-compare-write sequence across separate round-trips is never a
//! valid implementation, because correctness has to hold across processes that
//! share nothing but the store.
//!
//! The in-memory semantics each method must match are defined on the domain types
//! ([`TicketType::try_consume`], [`HoldRequest::apply`], [`Reservation::apply`],
//! [`Ticket::try_scan`]).
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `boxoffice-postgres`): production implementation
//! - `InMemoryTicketStore` (in `boxoffice-testing`): fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! components can hold an `Arc<dyn TicketStore>`.

use crate::capacity::{CapacityPool, ConsumeOutcome, TicketType, TicketTypeStatus};
use crate::error::StoreResult;
use crate::reservation::{HoldOutcome, HoldRequest, Reservation, ReservationTransition, TransitionOutcome};
use crate::ticket::{ScanOutcome, Ticket, Transaction};
use crate::types::{SessionId, TicketId, TicketTypeId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Catalog setup and plain reads.
pub trait CatalogStore: Send + Sync {
    /// Insert a new ticket type.
    ///
    /// # Errors
    ///
    /// - `Conflict`: a ticket type with this id already exists
    /// - `Unavailable`: the store could not be reached
    fn insert_ticket_type<'a>(&'a self, ticket_type: &'a TicketType) -> StoreFuture<'a, ()>;

    /// Load a ticket type with its current counters.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    /// - `Corrupt`: the stored row does not decode
    fn load_ticket_type<'a>(&'a self, id: &'a TicketTypeId)
    -> StoreFuture<'a, Option<TicketType>>;

    /// Set a ticket type's status. Returns `false` if the type does not exist.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn set_ticket_type_status<'a>(
        &'a self,
        id: &'a TicketTypeId,
        status: TicketTypeStatus,
    ) -> StoreFuture<'a, bool>;

    /// Load a single ticket.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    /// - `Corrupt`: the stored row does not decode
    fn load_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;
}

/// The bounded-counter primitive over ticket type pools.
pub trait CapacityStore: Send + Sync {
    /// Add `amount` to `pool` iff the pool's bound still holds afterwards,
    /// checked and written in one atomic step.
    ///
    /// Returns `None` if the ticket type does not exist. A `Rejected` outcome
    /// guarantees nothing was written.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the statement did not execute; nothing was written
    fn try_consume<'a>(
        &'a self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<ConsumeOutcome>>;

    /// Floor-at-zero decrement of `pool`. Returns the new count, or `None` if the
    /// ticket type does not exist.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the statement did not execute; nothing was written
    fn release<'a>(
        &'a self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<u32>>;
}

/// Reservation persistence.
pub trait ReservationStore: Send + Sync {
    /// Atomically consume held capacity and insert an active reservation, or
    /// answer from the reservation already stored under the session id.
    ///
    /// # Errors
    ///
    /// - `Conflict`: a concurrent hold for the same session could not be resolved
    /// - `Unavailable`: nothing was written
    fn hold<'a>(&'a self, request: &'a HoldRequest) -> StoreFuture<'a, HoldOutcome>;

    /// Load the reservation stored under a session id.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    /// - `Corrupt`: the stored row does not decode
    fn load_reservation<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> StoreFuture<'a, Option<Reservation>>;

    /// Move a reservation out of `Active` and return its held capacity, in one
    /// atomic step.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: nothing was written
    fn transition<'a>(
        &'a self,
        session_id: &'a SessionId,
        transition: ReservationTransition,
    ) -> StoreFuture<'a, TransitionOutcome>;

    /// Sessions whose reservation is active with `expires_at <= now`, oldest
    /// expiry first.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<SessionId>>;
}

/// A transaction and the tickets it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedRecord {
    /// The transaction
    pub transaction: Transaction,
    /// Its tickets, in issuance order
    pub tickets: Vec<Ticket>,
}

/// Result of cancelling a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Ticket moved to `cancelled`. `released` is true when its unit of capacity
    /// went back to the pool (only tickets that consumed capacity release it).
    Cancelled {
        /// The ticket after cancellation
        ticket: Ticket,
        /// Whether one unit was released
        released: bool,
    },
    /// Ticket was already cancelled; nothing changed.
    AlreadyCancelled(Ticket),
    /// No such ticket.
    NotFound,
}

/// Issuance persistence.
pub trait IssuanceStore: Send + Sync {
    /// Look up the transaction recorded for a session, with its tickets.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    /// - `Corrupt`: a stored row does not decode
    fn find_transaction<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> StoreFuture<'a, Option<IssuedRecord>>;

    /// Begin an issuance unit of work.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn begin_issuance(&self) -> StoreFuture<'_, Box<dyn IssuanceUnit>>;

    /// Cancel a ticket and return its capacity if it consumed any, atomically.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: nothing was written
    fn cancel_ticket(&self, id: TicketId) -> StoreFuture<'_, CancelOutcome>;
}

/// Unit of work for one issuance attempt.
///
/// Nothing staged through a unit is visible to other callers until
/// [`IssuanceUnit::commit`]; dropping an uncommitted unit discards it.
pub trait IssuanceUnit: Send {
    /// Stage the transaction row. Returns `false` if a transaction for the same
    /// session already exists (this caller lost the race and must not continue).
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn insert_transaction<'a>(&'a mut self, transaction: &'a Transaction) -> StoreFuture<'a, bool>;

    /// The ledger primitive, executed inside this unit.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn try_consume<'a>(
        &'a mut self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<ConsumeOutcome>>;

    /// Stage a ticket row.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn insert_ticket<'a>(&'a mut self, ticket: &'a Ticket) -> StoreFuture<'a, ()>;

    /// Make every staged write visible at once.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the unit could not be serialized against concurrent writers
    /// - `Unavailable`: nothing was committed
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// The per-ticket scan counter.
pub trait ScanStore: Send + Sync {
    /// Increment `scan_count` iff below `max_scan_count` and the ticket is
    /// scannable, in one atomic step. Returns `None` if the ticket does not exist.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the statement did not execute; nothing was written
    fn try_scan(&self, id: TicketId, now: DateTime<Utc>) -> StoreFuture<'_, Option<ScanOutcome>>;
}

/// Everything the engine needs from one store.
pub trait TicketStore:
    CatalogStore + CapacityStore + ReservationStore + IssuanceStore + ScanStore
{
}

impl<T> TicketStore for T where
    T: CatalogStore + CapacityStore + ReservationStore + IssuanceStore + ScanStore
{
}
