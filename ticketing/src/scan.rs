//! Scan Limiter: bounded admission per ticket.
//!
//! Each successful scan increments the ticket's `scan_count` in one conditional
//! store write, so concurrent scans of a single-use ticket admit exactly one.
//! Refused scans leave the counter untouched and are reported to the audit sink.

use crate::metrics;
use boxoffice_core::environment::Clock;
use boxoffice_core::{
    AuditEvent, AuditSink, ScanOutcome, ScanRecord, ScanRejection, StoreError, TicketId,
    TicketStatus, TicketStore,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the scan limiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// No such ticket.
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// The ticket has used its whole scan budget.
    #[error("maximum scans exceeded for ticket {ticket_id} ({scan_count}/{max_scan_count})")]
    LimitExceeded {
        /// Ticket
        ticket_id: TicketId,
        /// Scans so far
        scan_count: u32,
        /// Budget
        max_scan_count: u32,
    },

    /// The ticket's status forbids admission.
    #[error("ticket {ticket_id} is {status} and cannot be scanned")]
    NotScannable {
        /// Ticket
        ticket_id: TicketId,
        /// Its status
        status: TicketStatus,
    },

    /// The store failed; the scan was not recorded.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The scan limiter.
#[derive(Clone)]
pub struct ScanLimiter {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl ScanLimiter {
    /// Create a limiter.
    #[must_use]
    pub const fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { store, clock, audit }
    }

    /// Record one scan of `ticket_id` if its budget allows.
    ///
    /// Refusals come back as [`ScanOutcome`] variants, not errors.
    ///
    /// # Errors
    ///
    /// - [`ScanError::TicketNotFound`] if the ticket does not exist
    /// - [`ScanError::Store`] if the store failed
    pub async fn try_scan(&self, ticket_id: TicketId) -> Result<ScanOutcome, ScanError> {
        let now = self.clock.now();
        let Some(outcome) = self.store.try_scan(ticket_id, now).await? else {
            tracing::info!(ticket_id = %ticket_id, "Scan of unknown ticket");
            metrics::record_scan("not_found");
            return Err(ScanError::TicketNotFound(ticket_id));
        };

        match outcome {
            ScanOutcome::Accepted(record) => {
                tracing::info!(
                    ticket_id = %ticket_id,
                    scan_count = record.scan_count,
                    max_scan_count = record.max_scan_count,
                    "Ticket scanned"
                );
                metrics::record_scan("accepted");
            }
            ScanOutcome::LimitExceeded {
                scan_count,
                max_scan_count,
            } => {
                metrics::record_scan("limit_exceeded");
                self.audit.record(AuditEvent::ScanRejected {
                    ticket_id,
                    reason: ScanRejection::LimitExceeded {
                        scan_count,
                        max_scan_count,
                    },
                });
            }
            ScanOutcome::NotScannable { status } => {
                metrics::record_scan("not_scannable");
                self.audit.record(AuditEvent::ScanRejected {
                    ticket_id,
                    reason: ScanRejection::NotScannable { status },
                });
            }
        }

        Ok(outcome)
    }

    /// [`ScanLimiter::try_scan`] for callers that treat every refusal as an error.
    ///
    /// # Errors
    ///
    /// - [`ScanError::LimitExceeded`] if the budget is spent
    /// - [`ScanError::NotScannable`] if the ticket is cancelled
    /// - [`ScanError::TicketNotFound`] if the ticket does not exist
    /// - [`ScanError::Store`] if the store failed
    pub async fn require_scan(&self, ticket_id: TicketId) -> Result<ScanRecord, ScanError> {
        match self.try_scan(ticket_id).await? {
            ScanOutcome::Accepted(record) => Ok(record),
            ScanOutcome::LimitExceeded {
                scan_count,
                max_scan_count,
            } => Err(ScanError::LimitExceeded {
                ticket_id,
                scan_count,
                max_scan_count,
            }),
            ScanOutcome::NotScannable { status } => {
                Err(ScanError::NotScannable { ticket_id, status })
            }
        }
    }
}
