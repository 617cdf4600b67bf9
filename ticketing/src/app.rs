//! The box office: all four components over one store.

use crate::config::EngineConfig;
use crate::issuance::{IssuanceError, IssuanceOutcome, IssuanceService};
use crate::ledger::CapacityLedger;
use crate::reservation::{ReservationError, ReservationManager};
use crate::scan::ScanLimiter;
use boxoffice_core::environment::Clock;
use boxoffice_core::{AuditSink, PaymentConfirmed, TicketStore};
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`BoxOffice::complete_purchase`].
#[derive(Error, Debug)]
pub enum PurchaseError {
    /// Issuance failed; nothing was written.
    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    /// Tickets were issued but the reservation could not be fulfilled.
    /// Redelivering the event finishes the job.
    #[error("tickets issued, reservation not fulfilled: {0}")]
    Reservation(#[from] ReservationError),
}

/// The engine, wired.
///
/// Cheap to clone; every component shares the same store, clock and audit sink.
#[derive(Clone)]
pub struct BoxOffice {
    ledger: CapacityLedger,
    reservations: ReservationManager,
    issuance: IssuanceService,
    scans: ScanLimiter,
}

impl BoxOffice {
    /// Wire the components.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ledger: CapacityLedger::new(Arc::clone(&store)),
            reservations: ReservationManager::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                config.reservation_ttl(),
            ),
            issuance: IssuanceService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&audit),
                config.default_max_scan_count,
            )
            .with_retry_policy(config.retry_policy()),
            scans: ScanLimiter::new(store, clock, audit),
        }
    }

    /// The capacity ledger.
    #[must_use]
    pub const fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    /// The reservation manager.
    #[must_use]
    pub const fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    /// The issuance service.
    #[must_use]
    pub const fn issuance(&self) -> &IssuanceService {
        &self.issuance
    }

    /// The scan limiter.
    #[must_use]
    pub const fn scans(&self) -> &ScanLimiter {
        &self.scans
    }

    /// Handle a payment-confirmed event end to end.
    ///
    /// Issues the tickets (retrying transient store failures), then fulfills
    /// the session's reservation so its held capacity goes back. A session
    /// without a reservation bought directly; one whose reservation already
    /// expired or was released still gets its tickets.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::Issuance`] if issuance failed
    /// - [`PurchaseError::Reservation`] if the tickets were issued but the
    ///   reservation could not be fulfilled because the store failed
    pub async fn complete_purchase(
        &self,
        event: &PaymentConfirmed,
    ) -> Result<IssuanceOutcome, PurchaseError> {
        let outcome = self.issuance.process_with_retry(event).await?;

        let Some(receipt) = outcome.receipt() else {
            return Ok(outcome);
        };

        match self
            .reservations
            .fulfill(&event.session_id, receipt.transaction.id)
            .await
        {
            Ok(_) | Err(ReservationError::NotFound(_)) => {}
            Err(ReservationError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    transaction_id = %receipt.transaction.id,
                    reservation_status = from.as_str(),
                    "Paid session's reservation was already closed"
                );
            }
            Err(err) => return Err(err.into()),
        }

        Ok(outcome)
    }
}
