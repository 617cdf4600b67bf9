//! Ticket types and their capacity pools.
//!
//! A [`TicketType`] carries one hard bound (`max_quantity`) and three counters, one
//! per [`CapacityPool`]. Every counter is mutated through a single parameterized
//! primitive, so production sales, test sales and reservation holds share one code
//! path instead of branching on ad hoc flags.
//!
//! # Pools
//!
//! | Pool | Counter | Accept `n` iff |
//! |------|---------|----------------|
//! | `Production` | `sold_count` | `sold_count + n <= max_quantity` |
//! | `Test` | `test_sold_count` | `test_sold_count + n <= max_quantity` |
//! | `Held` | `held_count` | `held_count + sold_count + n <= max_quantity` |
//!
//! Test sales ride in their own lane: they are never subtracted from the capacity
//! buyers see (`available = max_quantity - sold_count`).

use crate::types::TicketTypeId;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a ticket type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketTypeStatus {
    /// Configured but not yet on sale
    Draft,
    /// On sale
    Available,
    /// Production capacity exhausted
    SoldOut,
    /// Sales ended
    Closed,
}

impl TicketTypeStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Available => "available",
            Self::SoldOut => "sold_out",
            Self::Closed => "closed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "draft" => Ok(Self::Draft),
            "available" => Ok(Self::Available),
            "sold_out" => Ok(Self::SoldOut),
            "closed" => Ok(Self::Closed),
            _ => Err(StoreError::Corrupt(format!("Invalid ticket type status: {s}"))),
        }
    }
}

impl fmt::Display for TicketTypeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the independently bounded counters of a ticket type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPool {
    /// Confirmed production sales (`sold_count`)
    Production,
    /// Confirmed non-production sales (`test_sold_count`)
    Test,
    /// Capacity held by active reservations (`held_count`)
    Held,
}

impl CapacityPool {
    /// Pool that a confirmed sale draws from.
    #[must_use]
    pub const fn for_sale(is_test: bool) -> Self {
        if is_test { Self::Test } else { Self::Production }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Test => "test",
            Self::Held => "held",
        }
    }
}

impl fmt::Display for CapacityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the bounded-counter primitive.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumeOutcome {
    /// Counter was incremented.
    Accepted {
        /// Counter value after the increment
        new_count: u32,
    },
    /// Bound would be exceeded; nothing was mutated.
    Rejected {
        /// Counter value observed at rejection time
        count: u32,
        /// The bound
        max_quantity: u32,
    },
}

impl ConsumeOutcome {
    /// Whether the increment was applied.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// A sellable category with a hard capacity bound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Catalog identifier
    pub id: TicketTypeId,
    /// Hard capacity bound
    pub max_quantity: u32,
    /// Production sales
    pub sold_count: u32,
    /// Non-production sales (separate accounting lane)
    pub test_sold_count: u32,
    /// Capacity held by active reservations
    pub held_count: u32,
    /// Lifecycle status
    pub status: TicketTypeStatus,
}

impl TicketType {
    /// Creates a draft ticket type with zeroed counters.
    #[must_use]
    pub const fn new(id: TicketTypeId, max_quantity: u32) -> Self {
        Self {
            id,
            max_quantity,
            sold_count: 0,
            test_sold_count: 0,
            held_count: 0,
            status: TicketTypeStatus::Draft,
        }
    }

    /// Creates a ticket type that is already on sale.
    #[must_use]
    pub const fn on_sale(id: TicketTypeId, max_quantity: u32) -> Self {
        let mut ticket_type = Self::new(id, max_quantity);
        ticket_type.status = TicketTypeStatus::Available;
        ticket_type
    }

    /// Capacity buyers see. Test sales and holds are not subtracted.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.max_quantity.saturating_sub(self.sold_count)
    }

    /// Capacity still open to new reservation holds.
    #[must_use]
    pub const fn holdable(&self) -> u32 {
        self.max_quantity
            .saturating_sub(self.sold_count)
            .saturating_sub(self.held_count)
    }

    /// Current value of a pool's counter.
    #[must_use]
    pub const fn count(&self, pool: CapacityPool) -> u32 {
        match pool {
            CapacityPool::Production => self.sold_count,
            CapacityPool::Test => self.test_sold_count,
            CapacityPool::Held => self.held_count,
        }
    }

    /// How many more units the pool accepts.
    #[must_use]
    pub const fn headroom(&self, pool: CapacityPool) -> u32 {
        match pool {
            CapacityPool::Production => self.available(),
            CapacityPool::Test => self.max_quantity.saturating_sub(self.test_sold_count),
            CapacityPool::Held => self.holdable(),
        }
    }

    fn counter_mut(&mut self, pool: CapacityPool) -> &mut u32 {
        match pool {
            CapacityPool::Production => &mut self.sold_count,
            CapacityPool::Test => &mut self.test_sold_count,
            CapacityPool::Held => &mut self.held_count,
        }
    }

    /// Increment `pool` by `amount` iff the pool's bound still holds afterwards.
    ///
    /// This is the reference semantics of the ledger primitive; store
    /// implementations perform the same check and write as one atomic step.
    /// A production increment that reaches the bound moves an `Available` type to
    /// `SoldOut`.
    pub fn try_consume(&mut self, pool: CapacityPool, amount: u32) -> ConsumeOutcome {
        if amount > self.headroom(pool) {
            return ConsumeOutcome::Rejected {
                count: self.count(pool),
                max_quantity: self.max_quantity,
            };
        }

        let counter = self.counter_mut(pool);
        *counter += amount;
        let new_count = *counter;

        if pool == CapacityPool::Production
            && self.status == TicketTypeStatus::Available
            && new_count >= self.max_quantity
        {
            self.status = TicketTypeStatus::SoldOut;
        }

        ConsumeOutcome::Accepted { new_count }
    }

    /// Floor-at-zero decrement of `pool`. Returns the new counter value.
    ///
    /// A production release that reopens capacity moves a `SoldOut` type back to
    /// `Available`.
    pub fn release(&mut self, pool: CapacityPool, amount: u32) -> u32 {
        let counter = self.counter_mut(pool);
        *counter = counter.saturating_sub(amount);
        let new_count = *counter;

        if pool == CapacityPool::Production
            && self.status == TicketTypeStatus::SoldOut
            && new_count < self.max_quantity
        {
            self.status = TicketTypeStatus::Available;
        }

        new_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five() -> TicketType {
        TicketType::on_sale(TicketTypeId::new("ga"), 5)
    }

    #[test]
    fn consume_up_to_bound_then_reject() {
        let mut tt = five();
        for expected in 1..=5 {
            assert_eq!(
                tt.try_consume(CapacityPool::Production, 1),
                ConsumeOutcome::Accepted { new_count: expected }
            );
        }
        assert_eq!(
            tt.try_consume(CapacityPool::Production, 1),
            ConsumeOutcome::Rejected { count: 5, max_quantity: 5 }
        );
        assert_eq!(tt.sold_count, 5);
        assert_eq!(tt.status, TicketTypeStatus::SoldOut);
    }

    #[test]
    fn rejected_consume_does_not_mutate() {
        let mut tt = five();
        let _ = tt.try_consume(CapacityPool::Production, 3);
        let before = tt.clone();
        assert!(!tt.try_consume(CapacityPool::Production, 3).is_accepted());
        assert_eq!(tt, before);
    }

    #[test]
    fn test_pool_does_not_reduce_production_availability() {
        let mut tt = five();
        for _ in 0..5 {
            assert!(tt.try_consume(CapacityPool::Test, 1).is_accepted());
        }
        assert_eq!(tt.test_sold_count, 5);
        assert_eq!(tt.available(), 5);
        assert!(tt.try_consume(CapacityPool::Production, 5).is_accepted());
        assert!(!tt.try_consume(CapacityPool::Test, 1).is_accepted());
    }

    #[test]
    fn holds_are_bounded_by_unsold_capacity() {
        let mut tt = five();
        let _ = tt.try_consume(CapacityPool::Production, 3);
        assert!(tt.try_consume(CapacityPool::Held, 2).is_accepted());
        assert_eq!(
            tt.try_consume(CapacityPool::Held, 1),
            ConsumeOutcome::Rejected { count: 2, max_quantity: 5 }
        );
        // Holds never reduce what buyers see.
        assert_eq!(tt.available(), 2);
    }

    #[test]
    fn release_floors_at_zero_and_reopens_sales() {
        let mut tt = five();
        let _ = tt.try_consume(CapacityPool::Production, 5);
        assert_eq!(tt.status, TicketTypeStatus::SoldOut);

        assert_eq!(tt.release(CapacityPool::Production, 2), 3);
        assert_eq!(tt.status, TicketTypeStatus::Available);

        assert_eq!(tt.release(CapacityPool::Held, 10), 0);
        assert_eq!(tt.release(CapacityPool::Production, 10), 0);
    }

    #[test]
    fn ledger_never_reopens_closed_types() {
        let mut tt = five();
        let _ = tt.try_consume(CapacityPool::Production, 5);
        tt.status = TicketTypeStatus::Closed;
        let _ = tt.release(CapacityPool::Production, 1);
        assert_eq!(tt.status, TicketTypeStatus::Closed);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut tt = TicketType::on_sale(TicketTypeId::new("none"), 0);
        assert!(!tt.try_consume(CapacityPool::Production, 1).is_accepted());
        assert!(!tt.try_consume(CapacityPool::Held, 1).is_accepted());
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            TicketTypeStatus::Draft,
            TicketTypeStatus::Available,
            TicketTypeStatus::SoldOut,
            TicketTypeStatus::Closed,
        ] {
            assert_eq!(TicketTypeStatus::parse(status.as_str()).ok(), Some(status));
        }
        assert!(TicketTypeStatus::parse("bogus").is_err());
    }
}
