//! # Box Office Core
//!
//! Core types and traits for the box office inventory engine.
//!
//! The engine sells a finite number of admission passes to many concurrent buyers.
//! Everything it does reduces to one algorithmic core: **atomically bounded counters
//! under concurrent, retryable operations**, with an explicit policy for what happens
//! when the bound is already exhausted.
//!
//! This crate holds the pieces every other crate agrees on:
//!
//! - **Types** ([`types`], [`capacity`], [`reservation`], [`ticket`]): identifiers,
//!   the [`TicketType`] aggregate with its capacity pools, the reservation state
//!   machine, transactions and tickets.
//! - **Pure transitions**: the in-memory semantics of every atomic primitive
//!   (`TicketType::try_consume`, `Reservation::apply`, `Ticket::try_scan`). Store
//!   implementations must be observably equivalent to these.
//! - **Store traits** ([`store`]): dyn-compatible persistence seams implemented by
//!   `boxoffice-postgres` (production) and `boxoffice-testing` (in-memory).
//! - **Inbound event** ([`payment`]): the gateway's payment-confirmed payload.
//! - **Audit** ([`audit`]): the outbound signal for flagged tickets and rejected scans.
//! - **Environment** ([`environment`]): injectable clock.
//!
//! # Concurrency Model
//!
//! Request handlers are stateless and may run in many processes at once. No
//! in-process lock coordinates correctness; every bounded-counter operation is a
//! single conditional update against the shared store (or a unit of work the store
//! executes atomically).
//!
//! ```text
//! buyer ──► ReservationManager.hold ──► held_count
//!                                          │
//! gateway ──► IssuanceService ──► sold_count / test_sold_count ──► Ticket rows
//!                                                                    │
//! scanner ──► ScanLimiter ──────────────────────────────────────► scan_count
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod capacity;
pub mod error;
pub mod payment;
pub mod reservation;
pub mod store;
pub mod ticket;
pub mod types;

pub use audit::{AuditEvent, AuditSink, FlagReason, ScanRejection, TracingAuditSink};
pub use capacity::{CapacityPool, ConsumeOutcome, TicketType, TicketTypeStatus};
pub use error::{StoreError, StoreResult};
pub use payment::{LineItem, PaymentConfirmed};
pub use reservation::{
    HoldOutcome, HoldRequest, Reservation, ReservationStatus, ReservationTransition,
    TransitionOutcome,
};
pub use store::{
    CancelOutcome, CatalogStore, CapacityStore, IssuanceStore, IssuanceUnit, IssuedRecord,
    ReservationStore, ScanStore, StoreFuture, TicketStore,
};
pub use ticket::{ScanOutcome, ScanRecord, Ticket, TicketStatus, Transaction};
pub use types::{Customer, Money, SessionId, TicketId, TicketTypeId, TransactionId};

/// Environment module - Dependency injection traits
///
/// All external dependencies the engine needs beyond the store are abstracted
/// behind traits and injected into the components at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Reservation expiry and scan timestamps are taken from the injected clock,
    /// never from `Utc::now()` directly, so tests can move time deterministically.
    ///
    /// # Examples
    ///
    /// ```
    /// use boxoffice_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
