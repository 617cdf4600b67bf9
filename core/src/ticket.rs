//! Transactions, tickets and the per-ticket scan counter.

use crate::capacity::CapacityPool;
use crate::types::{Customer, Money, SessionId, TicketId, TicketTypeId, TransactionId};
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable record of one completed purchase attempt.
///
/// At most one transaction exists per external session id, ever.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal identifier
    pub id: TransactionId,
    /// External payment session (unique)
    pub session_id: SessionId,
    /// Buyer contact information
    pub customer: Customer,
    /// Total charged
    pub amount: Money,
    /// When the purchase was recorded
    pub created_at: DateTime<Utc>,
}

/// Ticket status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Issued within capacity
    Valid,
    /// Refunded or voided
    Cancelled,
    /// Issued past capacity; awaiting manual reconciliation
    FlaggedForReview,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Cancelled => "cancelled",
            Self::FlaggedForReview => "flagged_for_review",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "valid" => Ok(Self::Valid),
            "cancelled" => Ok(Self::Cancelled),
            "flagged_for_review" => Ok(Self::FlaggedForReview),
            _ => Err(StoreError::Corrupt(format!("Invalid ticket status: {s}"))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One admission unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier
    pub id: TicketId,
    /// Category this ticket admits to
    pub ticket_type_id: TicketTypeId,
    /// Purchase that produced it
    pub transaction_id: TransactionId,
    /// Status
    pub status: TicketStatus,
    /// Accepted scans so far
    pub scan_count: u32,
    /// Scan budget
    pub max_scan_count: u32,
    /// First accepted scan
    pub first_scanned_at: Option<DateTime<Utc>>,
    /// Most recent accepted scan
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// Non-production purchase
    pub is_test: bool,
}

impl Ticket {
    /// Pool this ticket's sale was drawn from.
    #[must_use]
    pub const fn pool(&self) -> CapacityPool {
        CapacityPool::for_sale(self.is_test)
    }

    /// Reference semantics of the scan primitive.
    ///
    /// Increments `scan_count` iff it is below `max_scan_count` and the ticket is
    /// not cancelled. `first_scanned_at` is only set once; `last_scanned_at` moves
    /// on every accepted scan.
    pub fn try_scan(&mut self, now: DateTime<Utc>) -> ScanOutcome {
        if self.status == TicketStatus::Cancelled {
            return ScanOutcome::NotScannable {
                status: self.status,
            };
        }

        if self.scan_count >= self.max_scan_count {
            return ScanOutcome::LimitExceeded {
                scan_count: self.scan_count,
                max_scan_count: self.max_scan_count,
            };
        }

        self.scan_count += 1;
        self.first_scanned_at.get_or_insert(now);
        self.last_scanned_at = Some(now);

        ScanOutcome::Accepted(ScanRecord {
            ticket_id: self.id,
            scan_count: self.scan_count,
            max_scan_count: self.max_scan_count,
            first_scanned_at: self.first_scanned_at.unwrap_or(now),
            last_scanned_at: now,
        })
    }
}

/// Counter state after an accepted scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Scanned ticket
    pub ticket_id: TicketId,
    /// Scan count after this scan
    pub scan_count: u32,
    /// Scan budget
    pub max_scan_count: u32,
    /// First accepted scan
    pub first_scanned_at: DateTime<Utc>,
    /// This scan
    pub last_scanned_at: DateTime<Utc>,
}

impl ScanRecord {
    /// Scans left after this one.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.max_scan_count.saturating_sub(self.scan_count)
    }
}

/// Result of the scan primitive.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOutcome {
    /// Scan counted.
    Accepted(ScanRecord),
    /// Budget already spent; nothing was mutated.
    LimitExceeded {
        /// Current count
        scan_count: u32,
        /// Budget
        max_scan_count: u32,
    },
    /// Ticket status forbids admission; nothing was mutated.
    NotScannable {
        /// Current status
        status: TicketStatus,
    },
}

impl ScanOutcome {
    /// Whether the scan was counted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}
