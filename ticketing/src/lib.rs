//! Box Office - concurrency-safe inventory for admission passes
//!
//! Sells a finite number of passes to many concurrent buyers without ever
//! overselling a bound, and issues tickets exactly once per paid session even
//! when the payment gateway redelivers its event.
//!
//! - **Capacity ledger** ([`CapacityLedger`]): atomically bounded counters per
//!   ticket type and pool.
//! - **Reservations** ([`ReservationManager`]): short-lived holds during checkout,
//!   with expiry.
//! - **Issuance** ([`IssuanceService`]): payment-confirmed events to tickets,
//!   idempotent per session, never refusing a captured payment.
//! - **Scans** ([`ScanLimiter`]): bounded admissions per ticket.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!  buyer ──────────► │ ReservationManager           │ ──► held_count
//!                    ├──────────────────────────────┤
//!  gateway ────────► │ IssuanceService              │ ──► sold_count / test_sold_count
//!                    │   (one store unit of work)   │ ──► transaction + tickets
//!                    ├──────────────────────────────┤
//!  scanner ────────► │ ScanLimiter                  │ ──► scan_count
//!                    └──────────────────────────────┘
//!                                  │
//!                        Arc<dyn TicketStore>
//!                       (PostgreSQL / in-memory)
//! ```
//!
//! Components are stateless; correctness lives in the store's conditional
//! writes, so any number of processes may run them side by side.
//!
//! # Oversell policy
//!
//! A buyer who asks for more than is left is refused. A buyer who has already
//! paid is not: when issuance finds a pool exhausted, the ticket is issued as
//! `flagged_for_review` and an [`boxoffice_core::AuditEvent`] goes to operations.
//!
//! # Usage
//!
//! ```rust
//! use boxoffice_core::environment::SystemClock;
//! use boxoffice_core::{SessionId, TicketStore, TracingAuditSink};
//! use boxoffice_testing::InMemoryTicketStore;
//! use std::sync::Arc;
//! use ticketing::{BoxOffice, EngineConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryTicketStore::new();
//! let general = store.seed_on_sale("general", 100).await;
//!
//! let store: Arc<dyn TicketStore> = Arc::new(store);
//! let office = BoxOffice::new(
//!     store,
//!     Arc::new(SystemClock),
//!     Arc::new(TracingAuditSink),
//!     &EngineConfig::default(),
//! );
//!
//! let held = office
//!     .reservations()
//!     .create(&SessionId::new("cs_123"), &general, 2)
//!     .await?;
//! assert!(held.reservation().is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod issuance;
pub mod ledger;
pub mod metrics;
pub mod reservation;
pub mod retry;
pub mod scan;

pub use app::{BoxOffice, PurchaseError};
pub use config::{Config, EngineConfig, MetricsConfig, PostgresConfig};
pub use issuance::{
    FlaggedTicket, IssuanceError, IssuanceOutcome, IssuanceReceipt, IssuanceRejection,
    IssuanceService, parse_payment_event,
};
pub use ledger::{CapacityLedger, LedgerError};
pub use reservation::{ReservationError, ReservationManager, ReservationOutcome};
pub use retry::RetryPolicy;
pub use scan::{ScanError, ScanLimiter};
