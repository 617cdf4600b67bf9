//! Reservation state machine.
//!
//! ```text
//!            ┌──► Fulfilled
//!            │
//!  Active ───┼──► Released
//!            │
//!            └──► Expired
//! ```
//!
//! All three targets are terminal. While `Active`, a reservation's quantity is
//! counted in the ticket type's `held_count`; leaving `Active` returns it in full.

use crate::capacity::{CapacityPool, ConsumeOutcome, TicketType, TicketTypeStatus};
use crate::types::{SessionId, TicketTypeId, TransactionId};
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reservation lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding capacity, awaiting payment
    Active,
    /// Purchase completed and linked to a transaction
    Fulfilled,
    /// Cancelled by the buyer
    Released,
    /// Timed out
    Expired,
}

impl ReservationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Fulfilled => "fulfilled",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(Self::Active),
            "fulfilled" => Ok(Self::Fulfilled),
            "released" => Ok(Self::Released),
            "expired" => Ok(Self::Expired),
            _ => Err(StoreError::Corrupt(format!("Invalid reservation status: {s}"))),
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A temporary capacity hold tied to one purchase attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Purchase session (unique, idempotency key)
    pub session_id: SessionId,
    /// Ticket type being held
    pub ticket_type_id: TicketTypeId,
    /// Units held
    pub quantity: u32,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// When the hold was granted
    pub created_at: DateTime<Utc>,
    /// When the hold lapses (`None` = never)
    pub expires_at: Option<DateTime<Utc>>,
    /// Transaction linked on fulfillment
    pub transaction_id: Option<TransactionId>,
}

impl Reservation {
    /// Whether this reservation is still active but past its expiry time.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at.is_some_and(|at| now >= at)
    }

    /// Apply a transition in place.
    ///
    /// Returns [`TransitionOutcome::Applied`] only when the reservation left
    /// `Active`; the caller then owes a release of `quantity` from the held pool.
    /// Fulfilling an already fulfilled reservation is a no-op that reports the
    /// existing linkage.
    pub fn apply(&mut self, transition: ReservationTransition) -> TransitionOutcome {
        match (self.status, transition) {
            (ReservationStatus::Active, ReservationTransition::Fulfill { transaction_id }) => {
                self.status = ReservationStatus::Fulfilled;
                self.transaction_id = Some(transaction_id);
                TransitionOutcome::Applied(self.clone())
            }
            (ReservationStatus::Active, ReservationTransition::Release) => {
                self.status = ReservationStatus::Released;
                TransitionOutcome::Applied(self.clone())
            }
            (ReservationStatus::Active, ReservationTransition::Expire) => {
                self.status = ReservationStatus::Expired;
                TransitionOutcome::Applied(self.clone())
            }
            (ReservationStatus::Fulfilled, ReservationTransition::Fulfill { .. }) => {
                TransitionOutcome::AlreadyApplied(self.clone())
            }
            _ => TransitionOutcome::Invalid(self.clone()),
        }
    }
}

/// A requested move out of `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationTransition {
    /// Purchase completed
    Fulfill {
        /// Transaction to link
        transaction_id: TransactionId,
    },
    /// Explicit cancellation
    Release,
    /// Time-out
    Expire,
}

impl ReservationTransition {
    /// Status the reservation ends in.
    #[must_use]
    pub const fn target(&self) -> ReservationStatus {
        match self {
            Self::Fulfill { .. } => ReservationStatus::Fulfilled,
            Self::Release => ReservationStatus::Released,
            Self::Expire => ReservationStatus::Expired,
        }
    }

    /// Transaction linked by this transition, if any.
    #[must_use]
    pub const fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::Fulfill { transaction_id } => Some(*transaction_id),
            Self::Release | Self::Expire => None,
        }
    }
}

/// Store answer to a transition request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Reservation left `Active`; its held capacity was returned.
    Applied(Reservation),
    /// Fulfill on an already fulfilled reservation; nothing changed.
    AlreadyApplied(Reservation),
    /// Transition not legal from the current status; nothing changed.
    Invalid(Reservation),
    /// No reservation for the session.
    NotFound,
}

/// Everything the store needs to grant a hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldRequest {
    /// Purchase session
    pub session_id: SessionId,
    /// Ticket type to hold
    pub ticket_type_id: TicketTypeId,
    /// Units to hold (> 0)
    pub quantity: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp
    pub expires_at: Option<DateTime<Utc>>,
}

impl HoldRequest {
    /// Reference semantics of the atomic hold.
    ///
    /// `existing` is the reservation already stored under the session id, if any.
    /// Capacity is consumed from the held pool and the reservation is created in
    /// the same step; callers persist `ticket_type` and the returned reservation
    /// together or not at all.
    pub fn apply(
        &self,
        ticket_type: Option<&mut TicketType>,
        existing: Option<&Reservation>,
    ) -> HoldOutcome {
        if let Some(existing) = existing {
            return if existing.status == ReservationStatus::Active {
                HoldOutcome::Existing(existing.clone())
            } else {
                HoldOutcome::SessionClosed(existing.clone())
            };
        }

        let Some(ticket_type) = ticket_type else {
            return HoldOutcome::UnknownTicketType;
        };

        if ticket_type.status != TicketTypeStatus::Available {
            return HoldOutcome::NotOnSale(ticket_type.status);
        }

        match ticket_type.try_consume(CapacityPool::Held, self.quantity) {
            ConsumeOutcome::Accepted { .. } => HoldOutcome::Created(Reservation {
                session_id: self.session_id.clone(),
                ticket_type_id: self.ticket_type_id.clone(),
                quantity: self.quantity,
                status: ReservationStatus::Active,
                created_at: self.created_at,
                expires_at: self.expires_at,
                transaction_id: None,
            }),
            ConsumeOutcome::Rejected { .. } => HoldOutcome::CapacityExceeded {
                requested: self.quantity,
                holdable: ticket_type.holdable(),
            },
        }
    }
}

/// Store answer to a hold request.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HoldOutcome {
    /// New active reservation; capacity is held.
    Created(Reservation),
    /// The session already holds an active reservation; returned unchanged.
    Existing(Reservation),
    /// The session's reservation is terminal and cannot be re-held.
    SessionClosed(Reservation),
    /// Not enough unsold, unheld capacity.
    CapacityExceeded {
        /// Units asked for
        requested: u32,
        /// Units that could have been held
        holdable: u32,
    },
    /// Ticket type exists but is not on sale.
    NotOnSale(TicketTypeStatus),
    /// No such ticket type.
    UnknownTicketType,
}
