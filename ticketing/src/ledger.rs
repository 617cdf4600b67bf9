//! Capacity Ledger: the bounded-counter primitive over ticket type pools.
//!
//! The ledger adds nothing to the store's atomic step except input checks,
//! logging and metrics. The decision to accept or reject is made by the store
//! in one conditional write, never here.

use crate::metrics;
use boxoffice_core::{
    CapacityPool, ConsumeOutcome, StoreError, TicketStore, TicketType, TicketTypeId,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amounts must be positive.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// No such ticket type.
    #[error("unknown ticket type: {0}")]
    UnknownTicketType(TicketTypeId),

    /// The store failed; nothing was written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The capacity ledger.
#[derive(Clone)]
pub struct CapacityLedger {
    store: Arc<dyn TicketStore>,
}

impl CapacityLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub const fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Add `amount` to `pool` iff the bound still holds afterwards.
    ///
    /// A `Rejected` outcome means nothing was written; callers re-evaluate
    /// their policy rather than retrying.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ZeroAmount`] if `amount` is zero
    /// - [`LedgerError::UnknownTicketType`] if the ticket type does not exist
    /// - [`LedgerError::Store`] if the store could not execute the update
    pub async fn try_consume(
        &self,
        ticket_type_id: &TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> Result<ConsumeOutcome, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let outcome = self
            .store
            .try_consume(ticket_type_id, pool, amount)
            .await?
            .ok_or_else(|| LedgerError::UnknownTicketType(ticket_type_id.clone()))?;

        match outcome {
            ConsumeOutcome::Accepted { new_count } => {
                tracing::debug!(
                    ticket_type_id = %ticket_type_id,
                    pool = pool.as_str(),
                    amount,
                    new_count,
                    "Capacity consumed"
                );
                metrics::record_capacity_consumed(pool, amount);
            }
            ConsumeOutcome::Rejected {
                count,
                max_quantity,
            } => {
                tracing::info!(
                    ticket_type_id = %ticket_type_id,
                    pool = pool.as_str(),
                    amount,
                    count,
                    max_quantity,
                    "Capacity exhausted"
                );
                metrics::record_capacity_rejected(pool);
            }
        }

        Ok(outcome)
    }

    /// Floor-at-zero decrement of `pool`. Returns the new count.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ZeroAmount`] if `amount` is zero
    /// - [`LedgerError::UnknownTicketType`] if the ticket type does not exist
    /// - [`LedgerError::Store`] if the store could not execute the update
    pub async fn release(
        &self,
        ticket_type_id: &TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> Result<u32, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let new_count = self
            .store
            .release(ticket_type_id, pool, amount)
            .await?
            .ok_or_else(|| LedgerError::UnknownTicketType(ticket_type_id.clone()))?;

        tracing::debug!(
            ticket_type_id = %ticket_type_id,
            pool = pool.as_str(),
            amount,
            new_count,
            "Capacity released"
        );
        metrics::record_capacity_released(pool, amount);
        Ok(new_count)
    }

    /// Current counters and status of a ticket type.
    ///
    /// The snapshot is informational; it must never gate a write.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownTicketType`] if the ticket type does not exist
    /// - [`LedgerError::Store`] if the store could not be read
    pub async fn snapshot(&self, ticket_type_id: &TicketTypeId) -> Result<TicketType, LedgerError> {
        self.store
            .load_ticket_type(ticket_type_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownTicketType(ticket_type_id.clone()))
    }
}
