//! Issuance Service: payment-confirmed events to durable tickets, exactly once.
//!
//! # Algorithm
//!
//! 1. Look up the transaction recorded for the event's session id. If there is
//!    one, answer from it (`created = false`) without writing anything.
//! 2. Validate every line item before any write. A malformed event is rejected
//!    as a whole.
//! 3. Open an issuance unit and insert the transaction. The store's unique
//!    session id decides concurrent deliveries; the loser drops its unit and
//!    falls back to step 1.
//! 4. Consume one unit of capacity per ticket. Accepted units become `valid`
//!    tickets. Rejected units become `flagged_for_review` tickets: the payment
//!    was already captured, so the buyer gets a ticket and operations get an
//!    audit event.
//! 5. Commit. Nothing from the attempt is visible until then.
//!
//! Issuance never touches reservations; the caller fulfills a reservation
//! afterwards (see [`crate::BoxOffice::complete_purchase`]).

use crate::metrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use boxoffice_core::environment::Clock;
use boxoffice_core::{
    AuditEvent, AuditSink, CancelOutcome, CapacityPool, ConsumeOutcome, FlagReason, IssuedRecord,
    Money, PaymentConfirmed, SessionId, StoreError, Ticket, TicketId, TicketStatus, TicketStore,
    TicketTypeId, Transaction, TransactionId,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Durable result of an issuance: the transaction and all of its tickets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuanceReceipt {
    /// `false` when the session had already been issued
    pub created: bool,
    /// The transaction
    pub transaction: Transaction,
    /// Its tickets, in issuance order
    pub tickets: Vec<Ticket>,
}

impl IssuanceReceipt {
    fn from_record(record: IssuedRecord, created: bool) -> Self {
        Self {
            created,
            transaction: record.transaction,
            tickets: record.tickets,
        }
    }

    /// Number of tickets issued.
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    /// Tickets issued past capacity.
    #[must_use]
    pub fn flagged(&self) -> Vec<FlaggedTicket> {
        self.tickets
            .iter()
            .filter(|t| t.status == TicketStatus::FlaggedForReview)
            .map(|t| FlaggedTicket {
                ticket_id: t.id,
                ticket_type_id: t.ticket_type_id.clone(),
                pool: t.pool(),
            })
            .collect()
    }
}

/// A ticket issued as `flagged_for_review`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlaggedTicket {
    /// The ticket
    pub ticket_id: TicketId,
    /// Its ticket type
    pub ticket_type_id: TicketTypeId,
    /// Pool that was exhausted
    pub pool: CapacityPool,
}

/// Why a payment event was refused before any write.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum IssuanceRejection {
    /// The event has no line items.
    #[error("payment event has no line items")]
    NoLineItems,

    /// A line item asks for zero units.
    #[error("line item for {0} has zero quantity")]
    ZeroQuantity(TicketTypeId),

    /// A line item names a ticket type that does not exist.
    #[error("unknown ticket type: {0}")]
    UnknownTicketType(TicketTypeId),

    /// The total does not fit the amount type.
    #[error("payment total overflows")]
    AmountOverflow,
}

impl IssuanceRejection {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::NoLineItems => "no_line_items",
            Self::ZeroQuantity(_) => "zero_quantity",
            Self::UnknownTicketType(_) => "unknown_ticket_type",
            Self::AmountOverflow => "amount_overflow",
        }
    }
}

/// Result of processing a payment event.
///
/// The flagged case is its own variant so a caller cannot mistake an oversold
/// issuance for a clean one.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssuanceOutcome {
    /// Every ticket is `valid`.
    Issued(IssuanceReceipt),
    /// At least one ticket was issued past capacity.
    IssuedFlagged {
        /// All tickets, valid and flagged
        receipt: IssuanceReceipt,
        /// The flagged subset
        flagged: Vec<FlaggedTicket>,
    },
    /// The event was malformed; nothing was written.
    Rejected(IssuanceRejection),
}

impl IssuanceOutcome {
    fn from_receipt(receipt: IssuanceReceipt) -> Self {
        let flagged = receipt.flagged();
        if flagged.is_empty() {
            Self::Issued(receipt)
        } else {
            Self::IssuedFlagged { receipt, flagged }
        }
    }

    /// The receipt, unless the event was rejected.
    #[must_use]
    pub const fn receipt(&self) -> Option<&IssuanceReceipt> {
        match self {
            Self::Issued(receipt) | Self::IssuedFlagged { receipt, .. } => Some(receipt),
            Self::Rejected(_) => None,
        }
    }
}

/// Errors from the issuance service.
///
/// All of them leave nothing behind; redelivering the event is always safe.
#[derive(Error, Debug)]
pub enum IssuanceError {
    /// The payload is not a valid payment-confirmed event.
    #[error("malformed payment event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    /// A ticket type validated earlier vanished mid-issuance.
    #[error("ticket type {0} disappeared during issuance")]
    TicketTypeVanished(TicketTypeId),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IssuanceError {
    /// Whether redelivering the event may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::TicketTypeVanished(_) | Self::MalformedEvent(_) => false,
        }
    }
}

/// Parse a payment-confirmed event from its JSON payload.
///
/// # Errors
///
/// Returns [`IssuanceError::MalformedEvent`] if the payload does not match.
pub fn parse_payment_event(payload: &[u8]) -> Result<PaymentConfirmed, IssuanceError> {
    Ok(serde_json::from_slice(payload)?)
}

/// The issuance service.
#[derive(Clone)]
pub struct IssuanceService {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    default_max_scan_count: u32,
    retry_policy: RetryPolicy,
}

impl IssuanceService {
    /// Create a service. New tickets get `default_max_scan_count` scans.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        default_max_scan_count: u32,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            default_max_scan_count,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Use `policy` for [`IssuanceService::process_with_retry`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Turn a payment-confirmed event into a transaction and tickets, or return
    /// the ones already issued for its session.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::Store`] if the store failed; nothing from this
    /// attempt was committed.
    pub async fn process(
        &self,
        event: &PaymentConfirmed,
    ) -> Result<IssuanceOutcome, IssuanceError> {
        if let Some(receipt) = self.existing(&event.session_id).await? {
            return Ok(IssuanceOutcome::from_receipt(receipt));
        }

        let amount = match self.validate(event).await? {
            Ok(amount) => amount,
            Err(rejection) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    reason = %rejection,
                    "Payment event rejected"
                );
                metrics::record_issuance_rejected(rejection.as_str());
                return Ok(IssuanceOutcome::Rejected(rejection));
            }
        };

        let now = self.clock.now();
        let transaction = Transaction {
            id: TransactionId::new(),
            session_id: event.session_id.clone(),
            customer: event.customer.clone(),
            amount,
            created_at: now,
        };

        let mut unit = self.store.begin_issuance().await?;
        if !unit.insert_transaction(&transaction).await? {
            // Lost the race to a concurrent delivery of the same event.
            drop(unit);
            return match self.existing(&event.session_id).await? {
                Some(receipt) => Ok(IssuanceOutcome::from_receipt(receipt)),
                None => Err(StoreError::Conflict(format!(
                    "transaction for session {} neither inserted nor found",
                    event.session_id
                ))
                .into()),
            };
        }

        let pool = event.pool();
        let mut tickets = Vec::new();
        let mut flag_reasons = Vec::new();

        for item in &event.line_items {
            for _ in 0..item.quantity {
                let consumed = unit
                    .try_consume(&item.ticket_type_id, pool, 1)
                    .await?
                    .ok_or_else(|| IssuanceError::TicketTypeVanished(item.ticket_type_id.clone()))?;

                let status = match consumed {
                    ConsumeOutcome::Accepted { .. } => TicketStatus::Valid,
                    ConsumeOutcome::Rejected { max_quantity, .. } => {
                        flag_reasons.push(FlagReason::CapacityExhausted { pool, max_quantity });
                        TicketStatus::FlaggedForReview
                    }
                };

                let ticket = Ticket {
                    id: TicketId::new(),
                    ticket_type_id: item.ticket_type_id.clone(),
                    transaction_id: transaction.id,
                    status,
                    scan_count: 0,
                    max_scan_count: self.default_max_scan_count,
                    first_scanned_at: None,
                    last_scanned_at: None,
                    is_test: event.is_test,
                };
                unit.insert_ticket(&ticket).await?;
                tickets.push(ticket);
            }
        }

        unit.commit().await?;

        let receipt = IssuanceReceipt {
            created: true,
            transaction,
            tickets,
        };
        self.report_issued(&receipt, flag_reasons);
        Ok(IssuanceOutcome::from_receipt(receipt))
    }

    /// [`IssuanceService::process`], retried with backoff while the store
    /// reports a retryable failure.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable one.
    pub async fn process_with_retry(
        &self,
        event: &PaymentConfirmed,
    ) -> Result<IssuanceOutcome, IssuanceError> {
        retry_with_predicate(
            &self.retry_policy,
            || self.process(event),
            IssuanceError::is_retryable,
        )
        .await
    }

    /// The receipt for a session, if it was issued.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::Store`] if the store failed.
    pub async fn lookup(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<IssuanceReceipt>, IssuanceError> {
        Ok(self
            .store
            .find_transaction(session_id)
            .await?
            .map(|record| IssuanceReceipt::from_record(record, false)))
    }

    /// Cancel a ticket (refund path).
    ///
    /// A `valid` ticket returns its unit of capacity to its pool. A flagged
    /// ticket never consumed capacity and returns nothing. Cancelling twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::Store`] if the store failed.
    pub async fn cancel_ticket(&self, ticket_id: TicketId) -> Result<CancelOutcome, IssuanceError> {
        let outcome = self.store.cancel_ticket(ticket_id).await?;
        match &outcome {
            CancelOutcome::Cancelled { ticket, released } => {
                tracing::info!(
                    ticket_id = %ticket_id,
                    ticket_type_id = %ticket.ticket_type_id,
                    released,
                    "Ticket cancelled"
                );
                if *released {
                    metrics::record_capacity_released(ticket.pool(), 1);
                }
            }
            CancelOutcome::AlreadyCancelled(_) => {
                tracing::debug!(ticket_id = %ticket_id, "Ticket already cancelled");
            }
            CancelOutcome::NotFound => {
                tracing::debug!(ticket_id = %ticket_id, "Cancel for unknown ticket");
            }
        }
        Ok(outcome)
    }

    async fn existing(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<IssuanceReceipt>, IssuanceError> {
        let receipt = self.lookup(session_id).await?;
        if let Some(receipt) = &receipt {
            tracing::info!(
                session_id = %session_id,
                transaction_id = %receipt.transaction.id,
                ticket_count = receipt.ticket_count(),
                "Payment event already processed"
            );
            metrics::record_issuance_duplicate();
        }
        Ok(receipt)
    }

    /// Check the event against the catalog. The outer `Result` is a store
    /// failure; the inner one is the business verdict.
    async fn validate(
        &self,
        event: &PaymentConfirmed,
    ) -> Result<Result<Money, IssuanceRejection>, IssuanceError> {
        if event.line_items.is_empty() {
            return Ok(Err(IssuanceRejection::NoLineItems));
        }

        if let Some(item) = event.line_items.iter().find(|item| item.quantity == 0) {
            return Ok(Err(IssuanceRejection::ZeroQuantity(item.ticket_type_id.clone())));
        }

        let Some(amount) = event.total() else {
            return Ok(Err(IssuanceRejection::AmountOverflow));
        };

        let mut checked = HashSet::new();
        for item in &event.line_items {
            if !checked.insert(&item.ticket_type_id) {
                continue;
            }
            if self
                .store
                .load_ticket_type(&item.ticket_type_id)
                .await?
                .is_none()
            {
                return Ok(Err(IssuanceRejection::UnknownTicketType(
                    item.ticket_type_id.clone(),
                )));
            }
        }

        Ok(Ok(amount))
    }

    fn report_issued(&self, receipt: &IssuanceReceipt, flag_reasons: Vec<FlagReason>) {
        let flagged: Vec<&Ticket> = receipt
            .tickets
            .iter()
            .filter(|t| t.status == TicketStatus::FlaggedForReview)
            .collect();

        for (ticket, reason) in flagged.iter().zip(flag_reasons) {
            self.audit.record(AuditEvent::TicketFlagged {
                ticket_id: ticket.id,
                ticket_type_id: ticket.ticket_type_id.clone(),
                transaction_id: receipt.transaction.id,
                session_id: receipt.transaction.session_id.clone(),
                reason,
            });
        }

        let flagged_count = flagged.len();
        let valid_count = receipt.ticket_count() - flagged_count;
        metrics::record_tickets_issued(valid_count, flagged_count);

        if flagged_count > 0 {
            tracing::warn!(
                session_id = %receipt.transaction.session_id,
                transaction_id = %receipt.transaction.id,
                valid = valid_count,
                flagged = flagged_count,
                "Tickets issued past capacity, flagged for review"
            );
        } else {
            tracing::info!(
                session_id = %receipt.transaction.session_id,
                transaction_id = %receipt.transaction.id,
                tickets = valid_count,
                "Tickets issued"
            );
        }
    }
}
