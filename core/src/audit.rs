//! Outbound audit signal.
//!
//! Two things leave the engine for an operations process to pick up: tickets
//! issued past capacity, and scans that were refused. The engine only emits them;
//! reconciliation and audit-log querying live elsewhere.

use crate::capacity::CapacityPool;
use crate::ticket::TicketStatus;
use crate::types::{SessionId, TicketId, TicketTypeId, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a ticket was issued as `flagged_for_review`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagReason {
    /// The pool was exhausted when the paid unit was issued.
    CapacityExhausted {
        /// Pool that rejected the unit
        pool: CapacityPool,
        /// Bound at rejection time
        max_quantity: u32,
    },
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExhausted { pool, max_quantity } => {
                write!(f, "{pool} capacity exhausted (max {max_quantity})")
            }
        }
    }
}

/// Events surfaced to the audit/operations collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    /// A paid unit was issued past capacity.
    TicketFlagged {
        /// Flagged ticket
        ticket_id: TicketId,
        /// Ticket type that was oversold
        ticket_type_id: TicketTypeId,
        /// Owning transaction
        transaction_id: TransactionId,
        /// Purchase session
        session_id: SessionId,
        /// Why it was flagged
        reason: FlagReason,
    },
    /// A scan was refused.
    ScanRejected {
        /// Ticket that was scanned
        ticket_id: TicketId,
        /// Why it was refused
        reason: ScanRejection,
    },
}

/// Why a scan was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanRejection {
    /// Scan budget spent
    LimitExceeded {
        /// Current count
        scan_count: u32,
        /// Budget
        max_scan_count: u32,
    },
    /// Status forbids admission
    NotScannable {
        /// Current status
        status: TicketStatus,
    },
}

/// Sink for audit events.
///
/// Recording must not fail the operation that produced the event; implementations
/// that forward to external systems buffer or drop on their own terms.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Audit sink that writes structured `tracing` events under the
/// `boxoffice::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::TicketFlagged {
                ticket_id,
                ticket_type_id,
                transaction_id,
                session_id,
                reason,
            } => {
                tracing::warn!(
                    target: "boxoffice::audit",
                    %ticket_id,
                    %ticket_type_id,
                    %transaction_id,
                    %session_id,
                    %reason,
                    "Ticket issued past capacity, flagged for review"
                );
            }
            AuditEvent::ScanRejected { ticket_id, reason } => {
                tracing::warn!(
                    target: "boxoffice::audit",
                    %ticket_id,
                    ?reason,
                    "Scan rejected"
                );
            }
        }
    }
}
