//! `PostgreSQL` ticket store for the box office inventory engine.
//!
//! This crate provides [`PostgresTicketStore`], the production implementation of
//! every store trait in `boxoffice-core`. It uses sqlx and supports:
//!
//! - Bounded counters as single conditional `UPDATE ... RETURNING` statements
//! - Reservation holds and transitions inside short transactions
//! - Issuance units of work backed by one database transaction each
//! - Connection pooling
//! - Bundled schema migrations
//!
//! # Concurrency
//!
//! The store runs at the default `READ COMMITTED` isolation. That is enough
//! because no decision is made from a value read earlier: each bound lives in the
//! `WHERE` clause of the statement that writes, and Postgres re-evaluates it
//! against the latest committed row after acquiring the row lock.
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_core::{CapacityPool, CapacityStore, TicketTypeId};
//! use boxoffice_postgres::PostgresTicketStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresTicketStore::connect("postgres://localhost/boxoffice").await?;
//! store.migrate().await?;
//! let _outcome = store
//!     .try_consume(&TicketTypeId::new("ga"), CapacityPool::Production, 2)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod issuance;
mod queries;
mod store;

pub use store::PostgresTicketStore;
