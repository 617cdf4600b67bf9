//! # Box Office Testing
//!
//! Testing utilities and helpers for the box office inventory engine.
//!
//! This crate provides:
//! - Mock implementations of Environment traits ([`FixedClock`], [`MutableClock`])
//! - [`InMemoryTicketStore`]: a complete store implementation with failure injection
//! - [`RecordingAuditSink`]: captures audit events for assertions
//! - Builders for ticket types and payment events
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::{CapacityPool, CapacityStore, TicketTypeId};
//! use boxoffice_testing::InMemoryTicketStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryTicketStore::new();
//! store.seed_on_sale("ga", 2).await;
//!
//! let outcome = store
//!     .try_consume(&TicketTypeId::new("ga"), CapacityPool::Production, 2)
//!     .await?;
//! assert!(outcome.is_some_and(|o| o.is_accepted()));
//! # Ok(())
//! # }
//! ```

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

mod audit;
mod memory_store;

pub use audit::RecordingAuditSink;
pub use memory_store::InMemoryTicketStore;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests move forward by hand.
    ///
    /// Clones share the same time, so a clock handed to a component can be
    /// advanced from the test body to drive reservation expiry.
    ///
    /// ```
    /// use boxoffice_testing::mocks::MutableClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = MutableClock::starting_at_test_epoch();
    /// let start = clock.now();
    /// clock.advance(Duration::minutes(16));
    /// assert_eq!(clock.now() - start, Duration::minutes(16));
    /// ```
    #[derive(Debug, Clone)]
    pub struct MutableClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl MutableClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Create a clock starting at the [`test_clock`] instant
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_clock().now())
        }

        /// Move the clock forward
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to an absolute time
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap() = to;
        }
    }

    impl Clock for MutableClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and builders
pub mod helpers {
    use boxoffice_core::{Customer, LineItem, PaymentConfirmed, SessionId};

    /// Builder for [`PaymentConfirmed`] events.
    ///
    /// ```
    /// use boxoffice_testing::helpers::PaymentBuilder;
    ///
    /// let event = PaymentBuilder::new("cs_1").item("ga", 2).test_mode().build();
    /// assert_eq!(event.unit_count(), 2);
    /// assert!(event.is_test);
    /// ```
    #[derive(Debug, Clone)]
    pub struct PaymentBuilder {
        event: PaymentConfirmed,
    }

    impl PaymentBuilder {
        /// Start an event for `session_id` with a placeholder customer
        #[must_use]
        pub fn new(session_id: impl Into<String>) -> Self {
            Self {
                event: PaymentConfirmed {
                    session_id: SessionId::new(session_id),
                    line_items: Vec::new(),
                    customer: Customer::new("buyer@example.com", "Test Buyer"),
                    is_test: false,
                },
            }
        }

        /// Add a line item priced at $25.00 per unit
        #[must_use]
        pub fn item(self, ticket_type_id: impl Into<String>, quantity: u32) -> Self {
            self.priced_item(ticket_type_id, quantity, 2_500)
        }

        /// Add a line item with an explicit unit price
        #[must_use]
        pub fn priced_item(
            mut self,
            ticket_type_id: impl Into<String>,
            quantity: u32,
            unit_price_cents: u64,
        ) -> Self {
            self.event
                .line_items
                .push(LineItem::new(ticket_type_id, quantity, unit_price_cents));
            self
        }

        /// Replace the customer
        #[must_use]
        pub fn customer(mut self, email: impl Into<String>, name: impl Into<String>) -> Self {
            self.event.customer = Customer::new(email, name);
            self
        }

        /// Mark the purchase as a test-mode payment
        #[must_use]
        pub const fn test_mode(mut self) -> Self {
            self.event.is_test = true;
            self
        }

        /// Finish the event
        #[must_use]
        pub fn build(self) -> PaymentConfirmed {
            self.event
        }
    }

    /// Install a `tracing` subscriber that writes to the test harness' captured
    /// output. Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ticketing=debug,boxoffice=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use boxoffice_core::CapacityPool;
    use proptest::prelude::*;

    /// Any capacity pool.
    pub fn pool() -> impl Strategy<Value = CapacityPool> {
        prop_oneof![
            Just(CapacityPool::Production),
            Just(CapacityPool::Test),
            Just(CapacityPool::Held),
        ]
    }

    /// A counter operation against one ticket type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CounterOp {
        /// `try_consume(pool, amount)`
        Consume(CapacityPool, u32),
        /// `release(pool, amount)`
        Release(CapacityPool, u32),
    }

    /// A single consume or release of 1..=`max_amount` units.
    pub fn counter_op(max_amount: u32) -> impl Strategy<Value = CounterOp> {
        (any::<bool>(), pool(), 1..=max_amount).prop_map(|(consume, pool, amount)| {
            if consume {
                CounterOp::Consume(pool, amount)
            } else {
                CounterOp::Release(pool, amount)
            }
        })
    }

    /// A sequence of up to `len` counter operations.
    pub fn counter_ops(max_amount: u32, len: usize) -> impl Strategy<Value = Vec<CounterOp>> {
        prop::collection::vec(counter_op(max_amount), 0..len)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, MutableClock, test_clock};
