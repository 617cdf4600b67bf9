//! Inbound payment-confirmed event.
//!
//! Delivered by the payment gateway's webhook pipeline, possibly more than once
//! and in any order. Field names follow the gateway's camelCase JSON.

use crate::capacity::CapacityPool;
use crate::types::{Customer, Money, SessionId, TicketTypeId};
use serde::{Deserialize, Serialize};

/// One purchased ticket type and quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Ticket type purchased
    pub ticket_type_id: TicketTypeId,
    /// Units purchased
    pub quantity: u32,
    /// Price per unit
    pub unit_price_cents: Money,
}

impl LineItem {
    /// Creates a line item
    #[must_use]
    pub fn new(ticket_type_id: impl Into<String>, quantity: u32, unit_price_cents: u64) -> Self {
        Self {
            ticket_type_id: TicketTypeId::new(ticket_type_id),
            quantity,
            unit_price_cents: Money::from_cents(unit_price_cents),
        }
    }

    /// `quantity * unit_price`, or `None` on overflow.
    #[must_use]
    pub const fn subtotal(&self) -> Option<Money> {
        self.unit_price_cents.checked_multiply(self.quantity)
    }
}

/// A payment the gateway has captured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmed {
    /// External payment session (idempotency key)
    pub session_id: SessionId,
    /// Purchased items
    pub line_items: Vec<LineItem>,
    /// Buyer contact
    pub customer: Customer,
    /// Non-production purchase
    #[serde(default)]
    pub is_test: bool,
}

impl PaymentConfirmed {
    /// Pool every unit of this purchase is drawn from.
    #[must_use]
    pub const fn pool(&self) -> CapacityPool {
        CapacityPool::for_sale(self.is_test)
    }

    /// Total units across all line items, saturating.
    #[must_use]
    pub fn unit_count(&self) -> u32 {
        self.line_items
            .iter()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
    }

    /// Sum of all subtotals, or `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Money> {
        self.line_items
            .iter()
            .try_fold(Money::ZERO, |acc, item| acc.checked_add(item.subtotal()?))
    }
}
