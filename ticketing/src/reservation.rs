//! Reservation Manager: short-lived capacity holds during checkout.
//!
//! # State machine
//!
//! ```text
//!            ┌──► fulfilled
//! active ────┼──► released
//!            └──► expired
//! ```
//!
//! All three targets are terminal. A hold consumes the ticket type's `held`
//! pool; every move out of `active` returns it, in the same store step.
//!
//! Expiry is passive: an overdue reservation is expired when it is next read
//! through [`ReservationManager::get`] or [`ReservationManager::create`], or when
//! a sweeper calls [`ReservationManager::expire_stale`].

use crate::metrics;
use boxoffice_core::environment::Clock;
use boxoffice_core::{
    HoldOutcome, HoldRequest, Reservation, ReservationStatus, ReservationTransition, SessionId,
    StoreError, TicketStore, TicketTypeId, TicketTypeStatus, TransactionId, TransitionOutcome,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Answer to a hold request.
///
/// Rejections are normal outcomes: a buyer who asks for more than is left sees
/// "insufficient availability", not an error.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Capacity is now held for the session.
    Created(Reservation),
    /// The session already holds an active reservation; returned unchanged.
    Existing(Reservation),
    /// Not enough unsold, unheld capacity.
    CapacityExceeded {
        /// Units asked for
        requested: u32,
        /// Units that could have been held
        available: u32,
    },
    /// The ticket type is not on sale.
    NotOnSale(TicketTypeStatus),
    /// The session's reservation already reached a terminal state.
    SessionClosed(Reservation),
}

impl ReservationOutcome {
    /// The active reservation, if the session holds one after this call.
    #[must_use]
    pub const fn reservation(&self) -> Option<&Reservation> {
        match self {
            Self::Created(r) | Self::Existing(r) => Some(r),
            _ => None,
        }
    }
}

/// Errors from the reservation manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// Quantities must be positive.
    #[error("reservation quantity must be greater than zero")]
    ZeroQuantity,

    /// No such ticket type.
    #[error("unknown ticket type: {0}")]
    UnknownTicketType(TicketTypeId),

    /// No reservation stored for the session.
    #[error("no reservation for session {0}")]
    NotFound(SessionId),

    /// The reservation is terminal and cannot make this move.
    #[error("reservation for session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Session
        session_id: SessionId,
        /// Current status
        from: ReservationStatus,
        /// Requested status
        to: ReservationStatus,
    },

    /// The store failed; nothing was written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The reservation manager.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ReservationManager {
    /// Create a manager whose holds live for `ttl`.
    #[must_use]
    pub const fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self { store, clock, ttl }
    }

    /// Hold `quantity` units for `session_id`, expiring after the configured TTL.
    ///
    /// Idempotent per session: an active reservation is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ZeroQuantity`] if `quantity` is zero
    /// - [`ReservationError::UnknownTicketType`] if the ticket type does not exist
    /// - [`ReservationError::Store`] if the store failed
    pub async fn create(
        &self,
        session_id: &SessionId,
        ticket_type_id: &TicketTypeId,
        quantity: u32,
    ) -> Result<ReservationOutcome, ReservationError> {
        let expires_at = self.clock.now() + self.ttl;
        self.create_until(session_id, ticket_type_id, quantity, Some(expires_at))
            .await
    }

    /// Hold `quantity` units for `session_id` until `expires_at` (`None`: never
    /// expires).
    ///
    /// # Errors
    ///
    /// Same as [`ReservationManager::create`].
    pub async fn create_until(
        &self,
        session_id: &SessionId,
        ticket_type_id: &TicketTypeId,
        quantity: u32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ReservationOutcome, ReservationError> {
        if quantity == 0 {
            return Err(ReservationError::ZeroQuantity);
        }

        // An overdue hold is expired first so its capacity is back before we answer.
        let now = self.clock.now();
        self.expire_if_overdue(session_id, now).await?;

        let request = HoldRequest {
            session_id: session_id.clone(),
            ticket_type_id: ticket_type_id.clone(),
            quantity,
            created_at: now,
            expires_at,
        };

        let outcome = match self.store.hold(&request).await? {
            HoldOutcome::Created(reservation) => {
                tracing::info!(
                    session_id = %session_id,
                    ticket_type_id = %ticket_type_id,
                    quantity,
                    expires_at = ?reservation.expires_at,
                    "Reservation created"
                );
                metrics::record_reservation_created();
                ReservationOutcome::Created(reservation)
            }
            HoldOutcome::Existing(reservation) => {
                tracing::debug!(session_id = %session_id, "Reservation already active");
                ReservationOutcome::Existing(reservation)
            }
            HoldOutcome::SessionClosed(reservation) => {
                tracing::info!(
                    session_id = %session_id,
                    status = reservation.status.as_str(),
                    "Hold refused: session reservation is closed"
                );
                ReservationOutcome::SessionClosed(reservation)
            }
            HoldOutcome::CapacityExceeded {
                requested,
                holdable,
            } => {
                tracing::info!(
                    session_id = %session_id,
                    ticket_type_id = %ticket_type_id,
                    requested,
                    holdable,
                    "Hold refused: insufficient availability"
                );
                ReservationOutcome::CapacityExceeded {
                    requested,
                    available: holdable,
                }
            }
            HoldOutcome::NotOnSale(status) => {
                tracing::info!(
                    ticket_type_id = %ticket_type_id,
                    status = status.as_str(),
                    "Hold refused: ticket type not on sale"
                );
                ReservationOutcome::NotOnSale(status)
            }
            HoldOutcome::UnknownTicketType => {
                return Err(ReservationError::UnknownTicketType(ticket_type_id.clone()));
            }
        };

        Ok(outcome)
    }

    /// Mark the session's reservation fulfilled by `transaction_id` and return
    /// its held capacity.
    ///
    /// Fulfilling an already fulfilled reservation is a no-op that returns the
    /// existing linkage. An overdue but still active reservation is fulfilled:
    /// the payment beat the sweeper.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::NotFound`] if the session has no reservation
    /// - [`ReservationError::InvalidTransition`] if it was released or expired
    /// - [`ReservationError::Store`] if the store failed
    pub async fn fulfill(
        &self,
        session_id: &SessionId,
        transaction_id: TransactionId,
    ) -> Result<Reservation, ReservationError> {
        self.apply(session_id, ReservationTransition::Fulfill { transaction_id })
            .await
    }

    /// Cancel the session's active reservation and return its held capacity.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::NotFound`] if the session has no reservation
    /// - [`ReservationError::InvalidTransition`] if it is not active
    /// - [`ReservationError::Store`] if the store failed
    pub async fn release(&self, session_id: &SessionId) -> Result<Reservation, ReservationError> {
        self.apply(session_id, ReservationTransition::Release).await
    }

    /// Expire the session's active reservation and return its held capacity.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::NotFound`] if the session has no reservation
    /// - [`ReservationError::InvalidTransition`] if it is not active
    /// - [`ReservationError::Store`] if the store failed
    pub async fn expire(&self, session_id: &SessionId) -> Result<Reservation, ReservationError> {
        self.apply(session_id, ReservationTransition::Expire).await
    }

    /// The session's reservation, expiring it first if it is overdue.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Store`] if the store failed.
    pub async fn get(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Reservation>, ReservationError> {
        let now = self.clock.now();
        if let Some(expired) = self.expire_if_overdue(session_id, now).await? {
            return Ok(Some(expired));
        }
        Ok(self.store.load_reservation(session_id).await?)
    }

    /// Expire up to `limit` overdue reservations, oldest expiry first.
    /// Returns how many this call expired.
    ///
    /// Safe to run from several sweepers at once: a reservation another caller
    /// already closed is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Store`] if the store failed. Reservations
    /// expired before the failure stay expired.
    pub async fn expire_stale(&self, limit: usize) -> Result<usize, ReservationError> {
        let now = self.clock.now();
        let overdue = self.store.list_expired(now, limit).await?;

        let mut expired = 0;
        for session_id in &overdue {
            match self.apply(session_id, ReservationTransition::Expire).await {
                Ok(_) => expired += 1,
                Err(
                    ReservationError::InvalidTransition { .. } | ReservationError::NotFound(_),
                ) => {}
                Err(err) => return Err(err),
            }
        }

        if expired > 0 {
            tracing::info!(expired, scanned = overdue.len(), "Expired stale reservations");
        }
        Ok(expired)
    }

    async fn expire_if_overdue(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, ReservationError> {
        let Some(reservation) = self.store.load_reservation(session_id).await? else {
            return Ok(None);
        };
        if !reservation.is_expired_at(now) {
            return Ok(None);
        }

        match self.apply(session_id, ReservationTransition::Expire).await {
            Ok(expired) => Ok(Some(expired)),
            // Someone else closed it in between; the stored state is the answer.
            Err(ReservationError::InvalidTransition { .. }) => {
                Ok(self.store.load_reservation(session_id).await?)
            }
            Err(err) => Err(err),
        }
    }

    async fn apply(
        &self,
        session_id: &SessionId,
        transition: ReservationTransition,
    ) -> Result<Reservation, ReservationError> {
        match self.store.transition(session_id, transition).await? {
            TransitionOutcome::Applied(reservation) => {
                tracing::info!(
                    session_id = %session_id,
                    status = reservation.status.as_str(),
                    quantity = reservation.quantity,
                    transaction_id = ?reservation.transaction_id,
                    "Reservation closed, held capacity returned"
                );
                metrics::record_reservation_closed(reservation.status.as_str());
                Ok(reservation)
            }
            TransitionOutcome::AlreadyApplied(reservation) => {
                tracing::debug!(session_id = %session_id, "Reservation already fulfilled");
                Ok(reservation)
            }
            TransitionOutcome::Invalid(reservation) => Err(ReservationError::InvalidTransition {
                session_id: session_id.clone(),
                from: reservation.status,
                to: transition.target(),
            }),
            TransitionOutcome::NotFound => Err(ReservationError::NotFound(session_id.clone())),
        }
    }
}
